//! Per-batch debug annotations handed to the draw stage.

use crate::types::{DebugColor, DebugViewMode, JobDescriptor};

/// What the draw stage should overlay for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAnnotations<'a> {
    /// Job boxes to outline, `None` when bounds are off.
    pub bounds: Option<&'a [JobDescriptor]>,
    /// One color per job, empty when coloring is off.
    pub colors: Vec<DebugColor>,
}

impl<'a> BatchAnnotations<'a> {
    /// Build annotations for a batch, or `None` when the view is off.
    ///
    /// `slots` holds the slot index used by each job; `first_slot` is the slot
    /// of the frame's first job and `slot_count` the ring size.
    pub fn build(
        mode: DebugViewMode,
        batch_index: usize,
        jobs: &'a [JobDescriptor],
        slots: &[usize],
        first_slot: usize,
        slot_count: usize,
    ) -> Option<Self> {
        let colors = match mode {
            DebugViewMode::Off => return None,
            DebugViewMode::Bounds => Vec::new(),
            DebugViewMode::ColorByBatch => vec![batch_color(batch_index); jobs.len()],
            DebugViewMode::ColorBySlot => slots
                .iter()
                .map(|&slot| slot_color(slot, first_slot, slot_count))
                .collect(),
        };
        Some(Self {
            bounds: Some(jobs),
            colors,
        })
    }
}

/// Color shared by every job of batch `batch_index`.
///
/// Five hues, then dimmed by 0.75 for each further group of five, for eight
/// brightness levels.
pub fn batch_color(batch_index: usize) -> DebugColor {
    let tmp = batch_index % 5;
    let rb = match tmp {
        0 => 0.0,
        1 => 0.75,
        _ => 1.0,
    };
    let g = match tmp {
        2 => 0.0,
        3 => 0.75,
        _ => 1.0,
    };
    let scale = 0.75f32.powi(((batch_index / 5) % 8) as i32);
    DebugColor::new(rb * scale, g * scale, rb * scale)
}

/// Color for a slot, relative to the first slot used this frame.
pub fn slot_color(slot: usize, first_slot: usize, slot_count: usize) -> DebugColor {
    let relative = (slot + slot_count - first_slot % slot_count) % slot_count;
    let rb = 0.5f32.powi((relative % 5) as i32);
    let g = 0.5f32.powi((relative / 5) as i32);
    DebugColor::new(rb, g, rb)
}
