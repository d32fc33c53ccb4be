//! Headless fill, draw and present stages.
//!
//! No isosurface is extracted and nothing reaches a screen. The fill writes a
//! per-job tag into the header of the slot's geometry buffer with
//! [`GpuBackend::cmd_fill_buffer`]; on the simulated device the draw reads the
//! header back when it executes and counts every slot that no longer holds
//! the tag its fill wrote. A nonzero count means a slot was overwritten
//! before it was drawn.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use mcubes_graphics::{
    BatchAnnotations, BufferDescriptor, ComputeStage, GpuBackend, GpuBuffer, GraphicsError,
    GraphicsStage, JobDescriptor, Presenter, SlotRef, StageContext, CHUNK_EDGE_LENGTH_CELLS,
};

/// Size of the tag written at the start of every geometry buffer.
pub const TAG_SIZE: u64 = 8;

/// Bytes of the geometry header: two tag words, vertex count and padding.
pub const GEOMETRY_HEADER_SIZE: u64 = 16;

/// Equation the compute stage starts with.
pub const DEFAULT_EQUATION: &str = "sqrt(square(fract(y) - 0.5) + square(abs(r - 1))) - 0.15 \
     - 0.25*square(cos(t+(floor(y) + 3)*theta))";

/// Buffer sizes of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSizes {
    /// Sampled scalar field, one half-float per texel.
    pub volume: u64,
    /// Header followed by the extracted vertices.
    pub geometry: u64,
}

impl Default for SlotSizes {
    fn default() -> Self {
        let edge = CHUNK_EDGE_LENGTH_CELLS as u64 + 1;
        Self {
            volume: edge * edge * edge * 2,
            geometry: GEOMETRY_HEADER_SIZE + 65536 * 16,
        }
    }
}

impl SlotSizes {
    /// Just the headers; enough for the tag protocol.
    pub fn header_only() -> Self {
        Self {
            volume: TAG_SIZE,
            geometry: GEOMETRY_HEADER_SIZE,
        }
    }
}

/// Per-slot resources: the sampled volume and the extracted geometry.
#[derive(Debug)]
pub struct ChunkSlot {
    pub volume: GpuBuffer,
    pub geometry: GpuBuffer,
}

impl ChunkSlot {
    pub fn new(
        backend: &dyn GpuBackend,
        index: usize,
        sizes: SlotSizes,
    ) -> Result<Self, GraphicsError> {
        let volume =
            BufferDescriptor::new(sizes.volume).with_label(format!("chunk_volume_{index}"));
        let geometry =
            BufferDescriptor::new(sizes.geometry).with_label(format!("chunk_geometry_{index}"));
        Ok(Self {
            volume: backend.create_buffer(&volume)?,
            geometry: backend.create_buffer(&geometry)?,
        })
    }

    /// Allocate `count` slots up front.
    pub fn create_all(
        backend: &dyn GpuBackend,
        count: usize,
        sizes: SlotSizes,
    ) -> Result<Vec<Self>, GraphicsError> {
        (0..count).map(|i| Self::new(backend, i, sizes)).collect()
    }
}

/// Tag the fill of the `position`-th job of a batch writes.
///
/// The high word holds the low 32 bits of the frame number, the low word the
/// batch index and position as 16 bits each. A slot is never reused across
/// more than two frames, so the frame wrap cannot alias. `None` when the batch
/// index or position does not fit, rather than letting two jobs share a tag.
/// Never zero, so a slot that was never filled cannot match.
pub fn chunk_tag(frame_number: u64, batch_index: usize, position: usize) -> Option<u64> {
    let batch = u16::try_from(batch_index).ok()?;
    let position = u16::try_from(position).ok()?;
    let tag = (frame_number & 0xffff_ffff) << 32 | u64::from(batch) << 16 | u64::from(position);
    Some(tag.max(1))
}

fn tag_for(cx: &StageContext<'_>, position: usize) -> Result<u64, GraphicsError> {
    chunk_tag(cx.frame_number, cx.batch_index, position).ok_or_else(|| {
        GraphicsError::InvalidParameter(format!(
            "batch {} position {} does not fit a slot tag",
            cx.batch_index, position
        ))
    })
}

/// Counters shared by the headless stages.
#[derive(Debug, Default)]
pub struct HeadlessStats {
    pub fills: AtomicU64,
    pub draws_recorded: AtomicU64,
    /// Draws whose tag was checked on the device.
    pub draws_verified: AtomicU64,
    pub corruptions: AtomicU64,
    pub presents_recorded: AtomicU64,
    pub presents_executed: AtomicU64,
    equation: Mutex<String>,
}

impl HeadlessStats {
    pub fn new() -> Arc<Self> {
        let stats = Self::default();
        *stats.equation.lock() = DEFAULT_EQUATION.to_string();
        Arc::new(stats)
    }

    pub fn corruptions(&self) -> u64 {
        self.corruptions.load(Ordering::Acquire)
    }

    /// Equation currently installed in the compute stage.
    pub fn equation(&self) -> String {
        self.equation.lock().clone()
    }
}

/// Check that `equation` has balanced parentheses and is not blank.
fn check_equation(equation: &str) -> Result<(), GraphicsError> {
    if equation.trim().is_empty() {
        return Err(GraphicsError::InvalidParameter("equation is empty".to_string()));
    }
    let mut depth = 0usize;
    for (i, c) in equation.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!("unmatched ')' at {i}"))
                })?;
            }
            _ => {}
        }
    }
    if depth > 0 {
        return Err(GraphicsError::InvalidParameter(format!(
            "{depth} unclosed '(' in equation"
        )));
    }
    Ok(())
}

/// Writes each job's tag into its slot's geometry header.
pub struct HeadlessCompute {
    stats: Arc<HeadlessStats>,
}

impl HeadlessCompute {
    pub fn new(stats: Arc<HeadlessStats>) -> Self {
        Self { stats }
    }
}

impl ComputeStage<ChunkSlot> for HeadlessCompute {
    fn fill(
        &mut self,
        cx: &StageContext<'_>,
        jobs: &[JobDescriptor],
        slots: &[SlotRef<'_, ChunkSlot>],
    ) -> Result<(), GraphicsError> {
        debug_assert_eq!(jobs.len(), slots.len());
        for (position, slot) in slots.iter().enumerate() {
            let tag = tag_for(cx, position)?;
            let geometry = &slot.resources.geometry;
            cx.backend.cmd_fill_buffer(cx.command_buffer, geometry, 0, 4, tag as u32)?;
            cx.backend.cmd_fill_buffer(cx.command_buffer, geometry, 4, 4, (tag >> 32) as u32)?;
        }
        self.stats.fills.fetch_add(slots.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn replace_equation(&mut self, equation: &str) -> Result<(), GraphicsError> {
        check_equation(equation)?;
        *self.stats.equation.lock() = equation.to_string();
        Ok(())
    }
}

/// Verifies slot tags on the simulated device; records nothing on Vulkan.
pub struct HeadlessGraphics {
    stats: Arc<HeadlessStats>,
}

impl HeadlessGraphics {
    pub fn new(stats: Arc<HeadlessStats>) -> Self {
        Self { stats }
    }
}

impl GraphicsStage<ChunkSlot> for HeadlessGraphics {
    fn draw(
        &mut self,
        cx: &StageContext<'_>,
        _jobs: &[JobDescriptor],
        slots: &[SlotRef<'_, ChunkSlot>],
        annotations: Option<&BatchAnnotations<'_>>,
    ) -> Result<(), GraphicsError> {
        self.stats
            .draws_recorded
            .fetch_add(slots.len() as u64, Ordering::Relaxed);

        let Some(commands) = cx.command_buffer.as_dummy() else {
            return Ok(());
        };
        for (position, slot) in slots.iter().enumerate() {
            let Some(geometry) = slot.resources.geometry.as_dummy().cloned() else {
                continue;
            };
            let expected = tag_for(cx, position)?;
            let stats = self.stats.clone();
            let index = slot.index;
            let label = match annotations.and_then(|a| a.colors.get(position)) {
                Some(color) => format!(
                    "draw slot {index} tinted ({:.2}, {:.2}, {:.2})",
                    color.red, color.green, color.blue
                ),
                None => format!("draw slot {index}"),
            };
            commands.record(label, move || {
                let found = geometry
                    .read(0, TAG_SIZE as usize)
                    .ok()
                    .and_then(|bytes| bytes.try_into().ok())
                    .map(u64::from_le_bytes);
                if found != Some(expected) {
                    stats.corruptions.fetch_add(1, Ordering::AcqRel);
                    log::error!(
                        "Slot {} overwritten before drawn: expected tag {:#018x}, found {:?}",
                        index,
                        expected,
                        found
                    );
                }
                stats.draws_verified.fetch_add(1, Ordering::AcqRel);
            })?;
        }
        Ok(())
    }
}

/// Counts presented frames.
pub struct HeadlessPresenter {
    stats: Arc<HeadlessStats>,
}

impl HeadlessPresenter {
    pub fn new(stats: Arc<HeadlessStats>) -> Self {
        Self { stats }
    }
}

impl Presenter for HeadlessPresenter {
    fn present(&mut self, cx: &StageContext<'_>) -> Result<(), GraphicsError> {
        self.stats.presents_recorded.fetch_add(1, Ordering::Relaxed);
        if let Some(commands) = cx.command_buffer.as_dummy() {
            let stats = self.stats.clone();
            commands.record("present", move || {
                stats.presents_executed.fetch_add(1, Ordering::AcqRel);
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcubes_graphics::{DummyBackend, QueueKind};

    #[test]
    fn test_tags_differ_within_a_frame() {
        let tags: Vec<u64> = (0..6).map(|p| chunk_tag(3, 2, p).unwrap()).collect();
        for (i, a) in tags.iter().enumerate() {
            assert!(tags[i + 1..].iter().all(|b| a != b));
        }
        assert_ne!(chunk_tag(3, 1, 0), chunk_tag(3, 2, 0));
        assert_ne!(chunk_tag(0, 0, 0), Some(0));
    }

    #[test]
    fn test_tags_distinct_in_large_batches() {
        // Positions 0 and 16 shared a tag when only four bits were kept.
        assert_ne!(chunk_tag(1, 0, 0), chunk_tag(1, 0, 16));
        let tags: std::collections::HashSet<u64> = (0..300)
            .flat_map(|b| (0..64).map(move |p| chunk_tag(7, b, p).unwrap()))
            .collect();
        assert_eq!(tags.len(), 300 * 64);
        // Frames far apart still differ.
        assert_ne!(chunk_tag(1 << 16, 0, 0), chunk_tag(0, 0, 0));
    }

    #[test]
    fn test_tag_overflow_is_rejected() {
        assert_eq!(chunk_tag(0, 0, 1 << 16), None);
        assert_eq!(chunk_tag(0, 1 << 16, 0), None);
    }

    #[test]
    fn test_equation_checks() {
        assert!(check_equation(DEFAULT_EQUATION).is_ok());
        assert!(check_equation("   ").is_err());
        assert!(check_equation("cos(t").is_err());
        assert!(check_equation("x) + (y").is_err());
    }

    #[test]
    fn test_replace_equation_keeps_previous_on_error() {
        let stats = HeadlessStats::new();
        let mut compute = HeadlessCompute::new(stats.clone());
        assert!(compute.replace_equation("sin(x").is_err());
        assert_eq!(stats.equation(), DEFAULT_EQUATION);
        compute.replace_equation("x*x + y*y + z*z - 1").unwrap();
        assert_eq!(stats.equation(), "x*x + y*y + z*z - 1");
    }

    #[test]
    fn test_slot_sizes() {
        let sizes = SlotSizes::default();
        assert_eq!(sizes.volume, 128 * 128 * 128 * 2);
        assert_eq!(sizes.geometry % 4, 0);

        let backend = DummyBackend::new().unwrap();
        let slots = ChunkSlot::create_all(&backend, 3, SlotSizes::header_only()).unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[2].geometry.size(), GEOMETRY_HEADER_SIZE);
    }

    #[test]
    fn test_fill_then_draw_verifies() {
        let backend = DummyBackend::new().unwrap();
        let stats = HeadlessStats::new();
        let slots = ChunkSlot::create_all(&backend, 2, SlotSizes::header_only()).unwrap();
        let refs: Vec<_> = slots
            .iter()
            .enumerate()
            .map(|(index, resources)| SlotRef { index, resources })
            .collect();
        let jobs = vec![JobDescriptor::default(); 2];

        let pool = backend.create_command_pool(QueueKind::Graphics).unwrap();
        let command_buffer = backend.allocate_command_buffer(&pool).unwrap();
        backend.begin_command_buffer(&command_buffer).unwrap();
        let cx = StageContext {
            backend: &backend,
            command_buffer: &command_buffer,
            queue: QueueKind::Graphics,
            frame_number: 1,
            batch_index: 0,
        };
        HeadlessCompute::new(stats.clone()).fill(&cx, &jobs, &refs).unwrap();
        HeadlessGraphics::new(stats.clone()).draw(&cx, &jobs, &refs, None).unwrap();
        backend.end_command_buffer(&command_buffer).unwrap();
        backend
            .submit(
                QueueKind::Graphics,
                &mcubes_graphics::backend::Submission::new().command_buffer(&command_buffer),
            )
            .unwrap();
        backend.wait_idle().unwrap();

        assert_eq!(stats.fills.load(Ordering::Acquire), 2);
        assert_eq!(stats.draws_verified.load(Ordering::Acquire), 2);
        assert_eq!(stats.corruptions(), 0);
    }

    #[test]
    fn test_draw_without_fill_is_corruption() {
        let backend = DummyBackend::new().unwrap();
        let stats = HeadlessStats::new();
        let slots = ChunkSlot::create_all(&backend, 1, SlotSizes::header_only()).unwrap();
        let refs = [SlotRef {
            index: 0,
            resources: &slots[0],
        }];

        let pool = backend.create_command_pool(QueueKind::Graphics).unwrap();
        let command_buffer = backend.allocate_command_buffer(&pool).unwrap();
        backend.begin_command_buffer(&command_buffer).unwrap();
        let cx = StageContext {
            backend: &backend,
            command_buffer: &command_buffer,
            queue: QueueKind::Graphics,
            frame_number: 5,
            batch_index: 1,
        };
        HeadlessGraphics::new(stats.clone())
            .draw(&cx, &[JobDescriptor::default()], &refs, None)
            .unwrap();
        backend.end_command_buffer(&command_buffer).unwrap();
        backend
            .submit(
                QueueKind::Graphics,
                &mcubes_graphics::backend::Submission::new().command_buffer(&command_buffer),
            )
            .unwrap();
        backend.wait_idle().unwrap();

        assert_eq!(stats.corruptions(), 1);
    }
}
