//! Fixed ring of per-batch resource slots.

/// One slot: the caller's resources plus the last batch that used them.
#[derive(Debug)]
struct Slot<R> {
    resources: R,
    /// Signal value of the last batch whose commands reference this slot.
    /// 0 means never used.
    last_use: u64,
}

/// A ring of `N` slots handed out in order.
///
/// The pool never decides when a slot is free; it only remembers which batch
/// last touched each slot so the scheduler can make the GPU wait for it.
#[derive(Debug)]
pub struct SlotPool<R> {
    slots: Vec<Slot<R>>,
    cursor: usize,
}

impl<R> SlotPool<R> {
    /// Build a pool from pre-allocated resources.
    ///
    /// # Panics
    ///
    /// Panics if `resources` is empty.
    pub fn new(resources: Vec<R>) -> Self {
        assert!(!resources.is_empty(), "slot pool needs at least one slot");
        Self {
            slots: resources
                .into_iter()
                .map(|resources| Slot {
                    resources,
                    last_use: 0,
                })
                .collect(),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Index the next [`acquire_next`](Self::acquire_next) will return.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Return the next slot index in ring order.
    pub fn acquire_next(&mut self) -> usize {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.slots.len();
        index
    }

    pub fn get(&self, index: usize) -> &R {
        &self.slots[index].resources
    }

    pub fn last_use(&self, index: usize) -> u64 {
        self.slots[index].last_use
    }

    /// Record that the batch signalling `value` uses slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `value` is lower than the current tag.
    pub fn tag_last_use(&mut self, index: usize, value: u64) {
        let slot = &mut self.slots[index];
        assert!(
            value >= slot.last_use,
            "slot {} tag would move backwards ({} -> {})",
            index,
            slot.last_use,
            value
        );
        slot.last_use = value;
    }

    /// Largest tag among `indices`, 0 for an empty list.
    pub fn max_last_use(&self, indices: &[usize]) -> u64 {
        indices
            .iter()
            .map(|&index| self.slots[index].last_use)
            .max()
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.slots.iter().map(|slot| &slot.resources)
    }
}
