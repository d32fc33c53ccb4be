//! How a batch's fill and draw reach the GPU.

use crate::backend::{GpuBackend, GpuCommandBuffer, GpuFence, Submission};
use crate::error::GraphicsError;
use crate::types::QueueKind;

use super::sync::{CounterKind, ProgressCounters};

/// Submission strategy for a frame's batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubmissionStrategy {
    /// Fill on the compute queue, draw on the graphics queue, linked by the
    /// progress counters.
    #[default]
    DualQueue,
    /// Fill, barrier and draw in one graphics command buffer.
    SingleQueue,
}

impl SubmissionStrategy {
    pub const ALL: [Self; 2] = [Self::DualQueue, Self::SingleQueue];

    pub fn label(self) -> &'static str {
        match self {
            Self::DualQueue => "dual queue",
            Self::SingleQueue => "single queue",
        }
    }

    /// The other strategy.
    pub fn toggled(self) -> Self {
        match self {
            Self::DualQueue => Self::SingleQueue,
            Self::SingleQueue => Self::DualQueue,
        }
    }

    /// Whether this strategy uses the compute queue.
    pub fn uses_compute_queue(self) -> bool {
        self == Self::DualQueue
    }

    /// Submit one recorded batch.
    ///
    /// # Panics
    ///
    /// Panics if `batch` was recorded for the other strategy.
    pub(crate) fn submit_batch(
        self,
        backend: &dyn GpuBackend,
        counters: &ProgressCounters,
        batch: BatchCommands<'_>,
    ) -> Result<(), GraphicsError> {
        match (self, batch) {
            (
                Self::DualQueue,
                BatchCommands::Dual {
                    compute,
                    graphics,
                    wait,
                    signal,
                },
            ) => {
                let compute_done = counters.timeline(CounterKind::ComputeDone);
                let graphics_done = counters.timeline(CounterKind::GraphicsDone);

                let mut fill = Submission::new()
                    .command_buffer(compute)
                    .signal(compute_done, signal);
                if wait > 0 {
                    fill = fill.wait(graphics_done, wait);
                }
                backend.submit(QueueKind::Compute, &fill)?;

                let draw = Submission::new()
                    .command_buffer(graphics)
                    .wait(compute_done, signal)
                    .signal(graphics_done, signal);
                backend.submit(QueueKind::Graphics, &draw)
            }
            (Self::SingleQueue, BatchCommands::Single { commands, fence }) => {
                let mut submission = Submission::new().command_buffer(commands);
                if let Some(fence) = fence {
                    // Reset only now, so a frame that never reaches this
                    // point leaves the fence signalled.
                    backend.reset_fence(fence)?;
                    submission = submission.fence(fence);
                }
                backend.submit(QueueKind::Graphics, &submission)
            }
            (strategy, batch) => panic!(
                "{} cannot submit a batch recorded as {}",
                strategy,
                batch.strategy()
            ),
        }
    }
}

impl std::fmt::Display for SubmissionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Recorded command buffers of one batch, ready for submission.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BatchCommands<'a> {
    Dual {
        compute: &'a GpuCommandBuffer,
        graphics: &'a GpuCommandBuffer,
        /// `graphics_done` value the fill must wait for.
        wait: u64,
        /// Value both counters are signalled to.
        signal: u64,
    },
    Single {
        commands: &'a GpuCommandBuffer,
        /// Completion fence, set on the frame's last batch.
        fence: Option<&'a GpuFence>,
    },
}

impl BatchCommands<'_> {
    fn strategy(&self) -> SubmissionStrategy {
        match self {
            Self::Dual { .. } => SubmissionStrategy::DualQueue,
            Self::Single { .. } => SubmissionStrategy::SingleQueue,
        }
    }
}
