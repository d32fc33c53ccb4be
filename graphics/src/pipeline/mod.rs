//! Frame pipeline: two frames in flight over the batch scheduler.
//!
//! [`FramePipeline`] owns everything a frame needs besides its jobs: the
//! backend, the [`BatchScheduler`], two [`RecordingContext`]s per queue (one
//! per frame parity), presentation state and the stages.
//!
//! # Frame Lifecycle
//!
//! ```text
//! render_frame(request)
//!   1. frame_number += 1, parity = frame_number & 1
//!   2. apply deferred strategy / equation changes (wait_idle first)
//!   3. wait for the parity's contexts to retire, reset their pools
//!   4. record and submit every batch
//!   5. present: wait the parity's fence, re-record, submit with the fence
//! ```
//!
//! # Frame Overlap
//!
//! Frame `f` only waits for work recorded at frame `f - 2`, so the CPU records
//! one frame while the GPU executes the previous one:
//!
//! ```text
//! Frame 1: [record] [submit] ─────────────────────────────────────────►
//!                            [GPU frame 1] ──────────────────────────►
//! Frame 2:           [record] [submit] ──────────────────────────────►
//!                                      [GPU frame 2] ────────────────►
//! Frame 3:                    [wait F1] [record] [submit] ───────────►
//!                                                [GPU frame 3] ──────►
//! ```
//!
//! # Deferred Changes
//!
//! Switching the submission strategy or replacing the equation changes
//! state that in-flight work depends on. [`FramePipeline::request_strategy`]
//! and [`FramePipeline::request_equation`] only record the request; it is
//! applied at the start of the next frame with the device idle.
//!
//! # Graceful Shutdown
//!
//! Dropping the pipeline waits for the device to go idle before any GPU
//! object is destroyed. Call [`FramePipeline::wait_idle`] to observe errors.

mod context;

pub use context::RecordingContext;

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{GpuBackend, GpuCommandBuffer, GpuCommandPool, GpuFence, Submission};
use crate::config::{validate_strategy, SchedulerConfig};
use crate::error::GraphicsError;
use crate::profiling::{frame_mark, profile_function, profile_message, profile_plot, profile_scope};
use crate::scheduler::{
    BatchScheduler, CounterKind, FrameContexts, FrameStages, FrameStats, SlotPool,
    SubmissionStrategy,
};
use crate::stage::{ComputeStage, GraphicsStage, Presenter, StageContext};
use crate::types::{DebugViewMode, JobDescriptor, QueueKind};

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// What to render this frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameRequest<'a> {
    pub jobs: &'a [JobDescriptor],
    /// Jobs per batch, `1..=min(max_batch_size, slot_count / 2)`.
    pub batch_size: usize,
    pub debug_view: DebugViewMode,
}

/// Presentation resources of one frame parity.
#[derive(Debug)]
struct PresentSlot {
    fence: GpuFence,
    command_buffer: GpuCommandBuffer,
}

/// Records frames of batched jobs with two frames in flight.
pub struct FramePipeline<R> {
    scheduler: BatchScheduler<R>,
    compute_contexts: [RecordingContext; FRAMES_IN_FLIGHT],
    graphics_contexts: [RecordingContext; FRAMES_IN_FLIGHT],
    present: [PresentSlot; FRAMES_IN_FLIGHT],
    #[allow(dead_code)]
    present_pool: GpuCommandPool,
    compute_stage: Box<dyn ComputeStage<R>>,
    graphics_stage: Box<dyn GraphicsStage<R>>,
    presenter: Box<dyn Presenter>,
    frame_number: u64,
    pending_strategy: Option<SubmissionStrategy>,
    pending_equation: Option<String>,
    last_equation_error: Option<GraphicsError>,
    wait_timeout: Duration,
    // Declared last so every GPU object above is destroyed first.
    backend: Arc<dyn GpuBackend>,
}

impl<R> std::fmt::Debug for FramePipeline<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("backend", &self.backend.name())
            .field("strategy", &self.scheduler.strategy())
            .field("frame_number", &self.frame_number)
            .field("pending_strategy", &self.pending_strategy)
            .finish_non_exhaustive()
    }
}

impl<R> FramePipeline<R> {
    /// Build the pipeline. `slots` must hold exactly `config.slot_count` entries.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        config: &SchedulerConfig,
        slots: Vec<R>,
        compute_stage: Box<dyn ComputeStage<R>>,
        graphics_stage: Box<dyn GraphicsStage<R>>,
        presenter: Box<dyn Presenter>,
    ) -> Result<Self, GraphicsError> {
        config.validate(backend.as_ref())?;
        if slots.len() != config.slot_count {
            return Err(GraphicsError::InvalidConfiguration(format!(
                "expected {} slots, got {}",
                config.slot_count,
                slots.len()
            )));
        }

        let b = backend.as_ref();
        let scheduler = BatchScheduler::new(b, slots, config.strategy, config.max_batch_size)?;
        let compute_contexts = [
            RecordingContext::new(b, QueueKind::Compute)?,
            RecordingContext::new(b, QueueKind::Compute)?,
        ];
        let graphics_contexts = [
            RecordingContext::new(b, QueueKind::Graphics)?,
            RecordingContext::new(b, QueueKind::Graphics)?,
        ];
        let present_pool = b.create_command_pool(QueueKind::Graphics)?;
        let present = [
            PresentSlot {
                fence: b.create_fence(true)?,
                command_buffer: b.allocate_command_buffer(&present_pool)?,
            },
            PresentSlot {
                fence: b.create_fence(true)?,
                command_buffer: b.allocate_command_buffer(&present_pool)?,
            },
        ];

        log::info!(
            "Frame pipeline ready on {} ({} slots, batches up to {}, {})",
            b.name(),
            config.slot_count,
            scheduler.batch_size_limit(),
            config.strategy
        );

        Ok(Self {
            scheduler,
            compute_contexts,
            graphics_contexts,
            present,
            present_pool,
            compute_stage,
            graphics_stage,
            presenter,
            frame_number: 0,
            pending_strategy: None,
            pending_equation: None,
            last_equation_error: None,
            wait_timeout: config.wait_timeout,
            backend,
        })
    }

    /// Record, submit and present one frame.
    ///
    /// Presentation happens even when `request.jobs` is empty.
    ///
    /// # Panics
    ///
    /// Panics if `request.batch_size` is outside `1..=`[`batch_size_limit`](Self::batch_size_limit).
    pub fn render_frame(
        &mut self,
        request: &FrameRequest<'_>,
    ) -> Result<FrameStats, GraphicsError> {
        profile_function!();

        self.frame_number += 1;
        let frame_number = self.frame_number;
        let parity = (frame_number & 1) as usize;

        self.apply_pending_changes()?;

        let backend = self.backend.as_ref();
        let strategy = self.scheduler.strategy();
        {
            profile_scope!("retire_contexts");
            let counters = self.scheduler.counters();
            if strategy.uses_compute_queue() {
                let compute = &mut self.compute_contexts[parity];
                compute.wait_retired(backend, counters, strategy, self.wait_timeout)?;
                compute.begin(backend)?;
            }
            let graphics = &mut self.graphics_contexts[parity];
            graphics.wait_retired(backend, counters, strategy, self.wait_timeout)?;
            graphics.begin(backend)?;
        }

        let stats = self.scheduler.record_frame(
            backend,
            frame_number,
            FrameContexts {
                compute: &mut self.compute_contexts[parity],
                graphics: &mut self.graphics_contexts[parity],
            },
            request,
            FrameStages {
                compute: self.compute_stage.as_mut(),
                graphics: self.graphics_stage.as_mut(),
            },
        )?;

        self.present(parity)?;

        profile_plot!("last_signal", stats.last_signal.unwrap_or(0));
        frame_mark!();
        Ok(stats)
    }

    fn present(&mut self, parity: usize) -> Result<(), GraphicsError> {
        profile_scope!("present");
        let backend = self.backend.as_ref();
        let slot = &self.present[parity];

        backend.wait_fence(&slot.fence, self.wait_timeout)?;
        backend.begin_command_buffer(&slot.command_buffer)?;
        let cx = StageContext {
            backend,
            command_buffer: &slot.command_buffer,
            queue: QueueKind::Graphics,
            frame_number: self.frame_number,
            batch_index: 0,
        };
        self.presenter.present(&cx)?;
        backend.end_command_buffer(&slot.command_buffer)?;

        backend.reset_fence(&slot.fence)?;
        backend.submit(
            QueueKind::Graphics,
            &Submission::new()
                .command_buffer(&slot.command_buffer)
                .fence(&slot.fence),
        )
    }

    fn apply_pending_changes(&mut self) -> Result<(), GraphicsError> {
        if self.pending_strategy.is_none() && self.pending_equation.is_none() {
            return Ok(());
        }
        profile_scope!("apply_pending_changes");
        self.backend.wait_idle()?;

        if let Some(strategy) = self.pending_strategy.take() {
            let current = self.scheduler.strategy();
            if strategy != current {
                validate_strategy(strategy, self.backend.as_ref())?;
                log::info!(
                    "Frame {}: switching from {} to {}",
                    self.frame_number,
                    current,
                    strategy
                );
                profile_message!("submission strategy switched");
                self.scheduler.set_strategy(strategy);
            }
        }

        if let Some(equation) = self.pending_equation.take() {
            match self.compute_stage.replace_equation(&equation) {
                Ok(()) => {
                    log::info!("Frame {}: equation replaced", self.frame_number);
                    self.last_equation_error = None;
                }
                Err(e) => {
                    log::warn!("Keeping previous equation: {}", e);
                    self.last_equation_error = Some(e);
                }
            }
        }
        Ok(())
    }

    /// Switch strategy at the start of the next frame.
    ///
    /// Fails immediately if the backend cannot run `strategy`.
    pub fn request_strategy(&mut self, strategy: SubmissionStrategy) -> Result<(), GraphicsError> {
        validate_strategy(strategy, self.backend.as_ref())?;
        self.pending_strategy = Some(strategy);
        Ok(())
    }

    /// Replace the equation at the start of the next frame.
    pub fn request_equation(&mut self, equation: impl Into<String>) {
        self.pending_equation = Some(equation.into());
    }

    /// Strategy the next frame uses unless a change is pending.
    pub fn strategy(&self) -> SubmissionStrategy {
        self.scheduler.strategy()
    }

    pub fn pending_strategy(&self) -> Option<SubmissionStrategy> {
        self.pending_strategy
    }

    /// Error from the last equation replacement, cleared on success.
    pub fn last_equation_error(&self) -> Option<&GraphicsError> {
        self.last_equation_error.as_ref()
    }

    /// Number of the last rendered frame; 0 before the first.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn slots(&self) -> &SlotPool<R> {
        self.scheduler.slots()
    }

    pub fn batch_size_limit(&self) -> usize {
        self.scheduler.batch_size_limit()
    }

    /// Values `(compute_done, graphics_done)` have reached on the GPU.
    pub fn counters_completed(&self) -> Result<(u64, u64), GraphicsError> {
        let backend = self.backend.as_ref();
        let counters = self.scheduler.counters();
        Ok((
            counters.completed(backend, CounterKind::ComputeDone)?,
            counters.completed(backend, CounterKind::GraphicsDone)?,
        ))
    }

    /// The recording context used on `queue` for frames of `parity`.
    pub fn recording_context(&self, queue: QueueKind, parity: usize) -> &RecordingContext {
        match queue {
            QueueKind::Compute => &self.compute_contexts[parity % FRAMES_IN_FLIGHT],
            QueueKind::Graphics => &self.graphics_contexts[parity % FRAMES_IN_FLIGHT],
        }
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Block until every submitted frame has finished on the GPU.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.backend.wait_idle()
    }
}

impl<R> Drop for FramePipeline<R> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("Failed to drain the GPU before teardown: {}", e);
        }
    }
}
