//! Per-queue, per-frame-parity command recording state.

use std::time::Duration;

use crate::backend::{GpuBackend, GpuCommandBuffer, GpuCommandPool, GpuFence};
use crate::error::GraphicsError;
use crate::scheduler::{CounterKind, ProgressCounters, SubmissionStrategy};
use crate::types::QueueKind;

/// A command pool with a grow-only cache of command buffers.
///
/// One context exists per queue per frame parity, so a context is reused every
/// second frame. Before reuse the previous frame's work must have retired:
/// in dual-queue mode that is `retire_value` on the context's progress
/// counter, in single-queue mode the completion fence.
#[derive(Debug)]
pub struct RecordingContext {
    queue: QueueKind,
    pool: GpuCommandPool,
    command_buffers: Vec<GpuCommandBuffer>,
    cursor: usize,
    retire_value: u64,
    fence: GpuFence,
}

impl RecordingContext {
    pub fn new(backend: &dyn GpuBackend, queue: QueueKind) -> Result<Self, GraphicsError> {
        Ok(Self {
            queue,
            pool: backend.create_command_pool(queue)?,
            command_buffers: Vec::new(),
            cursor: 0,
            retire_value: 0,
            fence: backend.create_fence(true)?,
        })
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Block until the work recorded at this context's last use has completed.
    pub fn wait_retired(
        &self,
        backend: &dyn GpuBackend,
        counters: &ProgressCounters,
        strategy: SubmissionStrategy,
        timeout: Duration,
    ) -> Result<(), GraphicsError> {
        match strategy {
            SubmissionStrategy::DualQueue => {
                let counter = match self.queue {
                    QueueKind::Compute => CounterKind::ComputeDone,
                    QueueKind::Graphics => CounterKind::GraphicsDone,
                };
                counters.wait_until_at_least(backend, &[(counter, self.retire_value)], timeout)
            }
            SubmissionStrategy::SingleQueue => backend.wait_fence(&self.fence, timeout),
        }
    }

    /// Reset the pool and rewind the cache. The context must have retired.
    pub fn begin(&mut self, backend: &dyn GpuBackend) -> Result<(), GraphicsError> {
        backend.reset_command_pool(&self.pool)?;
        self.cursor = 0;
        Ok(())
    }

    /// Hand out the index of the next cached command buffer, allocating when
    /// the cache is exhausted.
    pub fn next_command_buffer(
        &mut self,
        backend: &dyn GpuBackend,
    ) -> Result<usize, GraphicsError> {
        if self.cursor == self.command_buffers.len() {
            let buffer = backend.allocate_command_buffer(&self.pool)?;
            log::trace!(
                "{} context grew to {} command buffers",
                self.queue,
                self.command_buffers.len() + 1
            );
            self.command_buffers.push(buffer);
        }
        let index = self.cursor;
        self.cursor += 1;
        Ok(index)
    }

    /// A command buffer handed out by [`next_command_buffer`](Self::next_command_buffer).
    pub fn command_buffer(&self, index: usize) -> &GpuCommandBuffer {
        &self.command_buffers[index]
    }

    /// Number of command buffers allocated so far.
    pub fn cached_len(&self) -> usize {
        self.command_buffers.len()
    }

    /// Number handed out since the last [`begin`](Self::begin).
    pub fn used(&self) -> usize {
        self.cursor
    }

    pub fn retire_value(&self) -> u64 {
        self.retire_value
    }

    pub(crate) fn set_retire_value(&mut self, value: u64) {
        self.retire_value = value;
    }

    pub(crate) fn fence(&self) -> &GpuFence {
        &self.fence
    }
}
