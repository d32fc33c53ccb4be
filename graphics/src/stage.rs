//! Interfaces the scheduler calls to record actual work.
//!
//! Stages only record into the command buffer they are handed; nothing they
//! record has executed when the call returns.

use crate::backend::{GpuBackend, GpuCommandBuffer};
use crate::error::GraphicsError;
use crate::scheduler::BatchAnnotations;
use crate::types::{JobDescriptor, QueueKind};

/// Everything a stage needs to record one call's worth of commands.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub backend: &'a dyn GpuBackend,
    pub command_buffer: &'a GpuCommandBuffer,
    /// Queue the command buffer will be submitted to.
    pub queue: QueueKind,
    pub frame_number: u64,
    /// Batch within the frame; 0 for presentation.
    pub batch_index: usize,
}

impl std::fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("backend", &self.backend.name())
            .field("command_buffer", self.command_buffer)
            .field("queue", &self.queue)
            .field("frame_number", &self.frame_number)
            .field("batch_index", &self.batch_index)
            .finish()
    }
}

/// A slot's index and resources, one per job of a batch.
#[derive(Debug)]
pub struct SlotRef<'a, R> {
    pub index: usize,
    pub resources: &'a R,
}

impl<R> Clone for SlotRef<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for SlotRef<'_, R> {}

/// Fills slots from jobs (the isosurface extraction).
pub trait ComputeStage<R> {
    /// Record the fill of `slots[i]` from `jobs[i]`.
    fn fill(
        &mut self,
        cx: &StageContext<'_>,
        jobs: &[JobDescriptor],
        slots: &[SlotRef<'_, R>],
    ) -> Result<(), GraphicsError>;

    /// Replace the scalar field equation.
    ///
    /// Only called between frames with the device idle.
    fn replace_equation(&mut self, _equation: &str) -> Result<(), GraphicsError> {
        Ok(())
    }
}

/// Draws filled slots.
pub trait GraphicsStage<R> {
    /// Called with the first batch's command buffer of every non-empty frame.
    fn prepare_frame(&mut self, _cx: &StageContext<'_>) -> Result<(), GraphicsError> {
        Ok(())
    }

    /// Record the draw of `slots[i]`, filled from `jobs[i]`.
    fn draw(
        &mut self,
        cx: &StageContext<'_>,
        jobs: &[JobDescriptor],
        slots: &[SlotRef<'_, R>],
        annotations: Option<&BatchAnnotations<'_>>,
    ) -> Result<(), GraphicsError>;

    /// Called with the last batch's command buffer, after its draw.
    fn finish_frame(&mut self, _cx: &StageContext<'_>) -> Result<(), GraphicsError> {
        Ok(())
    }
}

/// Records the per-frame presentation work.
pub trait Presenter {
    fn present(&mut self, cx: &StageContext<'_>) -> Result<(), GraphicsError>;
}
