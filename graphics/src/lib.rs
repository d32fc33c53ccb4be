//! # mcubes graphics
//!
//! Cross-queue scheduling core for an animated isosurface renderer.
//!
//! ## Overview
//!
//! Every frame, the scene is split into jobs (regions of space). Jobs are
//! processed in small batches: a compute stage fills a per-job slot with
//! geometry, a graphics stage draws it. Slots come from a fixed ring and are
//! recycled every few batches, so compute for one batch overlaps with
//! drawing of the previous one on a separate queue.
//!
//! This crate provides:
//! - [`FramePipeline`] - Two frames in flight, deferred strategy changes
//! - [`scheduler`] - Batches, the slot ring and the progress counters
//! - [`stage`] - Traits the caller implements to record fill, draw and present
//! - [`backend`] - GPU abstraction with Vulkan and simulated implementations
//!
//! ## Example
//!
//! ```ignore
//! use mcubes_graphics::{create_backend, BackendParameters, BackendType};
//! use mcubes_graphics::{FramePipeline, FrameRequest, SchedulerConfig};
//!
//! let backend = create_backend(BackendType::Auto, &BackendParameters::new())?;
//! let config = SchedulerConfig::default();
//! let mut pipeline = FramePipeline::new(backend, &config, slots, compute, graphics, presenter)?;
//!
//! loop {
//!     pipeline.render_frame(&FrameRequest { jobs: &jobs, batch_size: 6, debug_view })?;
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod profiling;
pub mod scheduler;
pub mod stage;
pub mod types;

pub use backend::{
    create_backend, has_gpu_backend, BackendParameters, BackendType, DummyBackend, DummyConfig,
    GpuBackend, GpuBuffer, GpuCommandBuffer,
};
pub use config::SchedulerConfig;
pub use error::GraphicsError;
pub use pipeline::{FramePipeline, FrameRequest, RecordingContext};
pub use scheduler::{BatchAnnotations, BatchScheduler, FrameStats, SlotPool, SubmissionStrategy};
pub use stage::{ComputeStage, GraphicsStage, Presenter, SlotRef, StageContext};
pub use types::{
    BufferDescriptor, DebugColor, DebugViewMode, JobDescriptor, QueueKind,
    CHUNK_EDGE_LENGTH_CELLS, DEFAULT_MAX_BATCH_SIZE, DEFAULT_SLOT_COUNT,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version. Call once at startup.
pub fn init() {
    log::info!("mcubes graphics v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new().unwrap();
        assert_eq!(backend.name(), "Dummy Backend");
    }
}
