//! Batch scheduling across the compute and graphics queues.
//!
//! A frame's jobs are split into batches of at most `B` jobs. Each batch takes
//! `B` slots from a ring of `N`, has compute fill them and graphics draw them.
//! Slots are reused long before the CPU would otherwise know the GPU is done
//! with them; all reuse safety comes from GPU-side waits on two progress
//! counters.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Pipeline | [`FramePipeline`](crate::pipeline::FramePipeline) | Two frames in flight, deferred changes, presentation |
//! | **Scheduler** | [`BatchScheduler`] | Batches, slots and counter values (this module) |
//! | Strategy | [`SubmissionStrategy`] | Dual-queue or single-queue submission of one batch |
//! | Stages | [`ComputeStage`], [`GraphicsStage`] | Record the actual fill and draw |
//!
//! # Dual-queue protocol
//!
//! For a batch with slots `S` and fresh signal value `V`:
//!
//! ```text
//! wait = max(last_use(s) for s in S)              // always < V
//! compute:  wait graphics_done >= wait, fill S,  signal compute_done = V
//! graphics: wait compute_done >= V,     draw S,  signal graphics_done = V
//! last_use(s) = V for s in S                      // tagged before submission
//! ```
//!
//! Because `B <= N / 2`, a slot is never reused by the batch directly after
//! the one that last used it, so compute can fill batch `k + 1` while graphics
//! still draws batch `k`.
//!
//! # Module Contents
//!
//! - [`BatchScheduler`] - Records and submits a frame's batches
//! - [`SlotPool`] - Ring of slots with last-use tags
//! - [`ProgressCounters`] - The `compute_done` / `graphics_done` timelines
//! - [`partition`] - Splits jobs into [`Batch`]es
//! - [`BatchAnnotations`] - Debug view overlays per batch

mod batch;
mod debug_view;
mod slots;
mod strategy;
mod sync;

pub use batch::{batch_count, partition, Batch, Batches};
pub use debug_view::{batch_color, slot_color, BatchAnnotations};
pub use slots::SlotPool;
pub use strategy::SubmissionStrategy;
pub use sync::{CounterKind, ProgressCounters};

pub(crate) use strategy::BatchCommands;

use crate::backend::GpuBackend;
use crate::error::GraphicsError;
use crate::pipeline::{FrameRequest, RecordingContext};
use crate::profiling::{profile_function, profile_plot, profile_scope};
use crate::stage::{ComputeStage, GraphicsStage, SlotRef, StageContext};
use crate::types::{DebugViewMode, QueueKind};

/// The recording contexts of the current frame parity.
pub struct FrameContexts<'a> {
    /// Unused in single-queue mode.
    pub compute: &'a mut RecordingContext,
    pub graphics: &'a mut RecordingContext,
}

/// The stages a frame records with.
pub struct FrameStages<'a, R> {
    pub compute: &'a mut dyn ComputeStage<R>,
    pub graphics: &'a mut dyn GraphicsStage<R>,
}

/// Summary of one recorded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_number: u64,
    pub strategy: SubmissionStrategy,
    pub jobs: usize,
    pub batches: usize,
    /// Slot of the frame's first job.
    pub first_slot: Option<usize>,
    /// Counter value signalled by the first batch (dual-queue only).
    pub first_signal: Option<u64>,
    /// Counter value signalled by the last batch (dual-queue only).
    pub last_signal: Option<u64>,
}

/// Per-frame settings threaded through batch recording.
#[derive(Clone, Copy)]
struct FrameParams {
    frame_number: u64,
    debug_view: DebugViewMode,
    first_slot: usize,
}

/// Owns the slot ring and the progress counters; records frames.
#[derive(Debug)]
pub struct BatchScheduler<R> {
    slots: SlotPool<R>,
    counters: ProgressCounters,
    strategy: SubmissionStrategy,
    batch_size_limit: usize,
}

impl<R> BatchScheduler<R> {
    /// `batch_size_limit` must be in `1..=slots.len() / 2`.
    pub fn new(
        backend: &dyn GpuBackend,
        slots: Vec<R>,
        strategy: SubmissionStrategy,
        batch_size_limit: usize,
    ) -> Result<Self, GraphicsError> {
        if batch_size_limit == 0 || batch_size_limit.saturating_mul(2) > slots.len() {
            return Err(GraphicsError::InvalidConfiguration(format!(
                "batch size limit {} is outside 1..={} for {} slots",
                batch_size_limit,
                slots.len() / 2,
                slots.len()
            )));
        }
        let slots = SlotPool::new(slots);
        Ok(Self {
            slots,
            counters: ProgressCounters::new(backend)?,
            strategy,
            batch_size_limit,
        })
    }

    pub fn strategy(&self) -> SubmissionStrategy {
        self.strategy
    }

    /// Change the strategy. The device must be idle.
    pub(crate) fn set_strategy(&mut self, strategy: SubmissionStrategy) {
        self.strategy = strategy;
    }

    pub fn slots(&self) -> &SlotPool<R> {
        &self.slots
    }

    pub fn counters(&self) -> &ProgressCounters {
        &self.counters
    }

    /// Largest batch size a frame may request.
    pub fn batch_size_limit(&self) -> usize {
        self.batch_size_limit
    }

    /// Record and submit every batch of a frame.
    ///
    /// The contexts must have retired and been begun.
    ///
    /// # Panics
    ///
    /// Panics if the batch size is 0 or above [`batch_size_limit`](Self::batch_size_limit),
    /// or if a batch would wait on its own signal value.
    pub fn record_frame(
        &mut self,
        backend: &dyn GpuBackend,
        frame_number: u64,
        mut contexts: FrameContexts<'_>,
        request: &FrameRequest<'_>,
        mut stages: FrameStages<'_, R>,
    ) -> Result<FrameStats, GraphicsError> {
        profile_function!();

        let batch_size = request.batch_size;
        assert!(
            (1..=self.batch_size_limit).contains(&batch_size),
            "batch size {} outside 1..={} ({} slots)",
            batch_size,
            self.batch_size_limit,
            self.slots.capacity()
        );

        let params = FrameParams {
            frame_number,
            debug_view: request.debug_view,
            first_slot: self.slots.cursor(),
        };
        let mut stats = FrameStats {
            frame_number,
            strategy: self.strategy,
            jobs: request.jobs.len(),
            batches: 0,
            first_slot: (!request.jobs.is_empty()).then_some(params.first_slot),
            first_signal: None,
            last_signal: None,
        };

        let mut slot_indices = Vec::with_capacity(batch_size);
        for batch in partition(request.jobs, batch_size) {
            profile_scope!("record_batch");
            match self.strategy {
                SubmissionStrategy::DualQueue => {
                    let signal = self.record_dual_batch(
                        backend,
                        params,
                        &mut contexts,
                        &batch,
                        &mut stages,
                        &mut slot_indices,
                    )?;
                    stats.first_signal.get_or_insert(signal);
                    stats.last_signal = Some(signal);
                }
                SubmissionStrategy::SingleQueue => self.record_single_batch(
                    backend,
                    params,
                    &mut contexts,
                    &batch,
                    &mut stages,
                    &mut slot_indices,
                )?,
            }
            stats.batches += 1;
        }

        profile_plot!("batches", stats.batches);
        log::debug!(
            "Frame {}: {} jobs in {} batches ({}, signals {:?}..={:?})",
            frame_number,
            stats.jobs,
            stats.batches,
            stats.strategy,
            stats.first_signal,
            stats.last_signal
        );
        Ok(stats)
    }

    fn acquire_slots(&mut self, count: usize, indices: &mut Vec<usize>) {
        indices.clear();
        indices.extend((0..count).map(|_| self.slots.acquire_next()));
    }

    /// Record one batch on both queues; returns its signal value.
    fn record_dual_batch(
        &mut self,
        backend: &dyn GpuBackend,
        params: FrameParams,
        contexts: &mut FrameContexts<'_>,
        batch: &Batch<'_>,
        stages: &mut FrameStages<'_, R>,
        slot_indices: &mut Vec<usize>,
    ) -> Result<u64, GraphicsError> {
        let compute_index = contexts.compute.next_command_buffer(backend)?;
        let graphics_index = contexts.graphics.next_command_buffer(backend)?;
        let compute_cb = contexts.compute.command_buffer(compute_index);
        let graphics_cb = contexts.graphics.command_buffer(graphics_index);
        backend.begin_command_buffer(compute_cb)?;
        backend.begin_command_buffer(graphics_cb)?;

        let compute_cx = StageContext {
            backend,
            command_buffer: compute_cb,
            queue: QueueKind::Compute,
            frame_number: params.frame_number,
            batch_index: batch.index,
        };
        let graphics_cx = StageContext {
            command_buffer: graphics_cb,
            queue: QueueKind::Graphics,
            ..compute_cx
        };

        if batch.is_first {
            stages.graphics.prepare_frame(&graphics_cx)?;
        }

        self.acquire_slots(batch.len(), slot_indices);
        let wait = self.slots.max_last_use(slot_indices);
        let signal = self.counters.advance();

        stages
            .compute
            .fill(&compute_cx, batch.jobs, &slot_refs(&self.slots, slot_indices))?;
        backend.cmd_compute_to_graphics_barrier(graphics_cb);

        // Tagged before submission: the next batch touching these slots must
        // wait for this draw even though it has not been submitted yet.
        for &index in slot_indices.iter() {
            self.slots.tag_last_use(index, signal);
        }

        let annotations = BatchAnnotations::build(
            params.debug_view,
            batch.index,
            batch.jobs,
            slot_indices,
            params.first_slot,
            self.slots.capacity(),
        );
        stages.graphics.draw(
            &graphics_cx,
            batch.jobs,
            &slot_refs(&self.slots, slot_indices),
            annotations.as_ref(),
        )?;

        if batch.is_last {
            stages.graphics.finish_frame(&graphics_cx)?;
        }

        assert!(
            wait < signal,
            "batch {} of frame {} would wait for graphics_done >= {} before signalling {}",
            batch.index,
            params.frame_number,
            wait,
            signal
        );

        backend.end_command_buffer(compute_cb)?;
        backend.end_command_buffer(graphics_cb)?;
        log::trace!(
            "Batch {}: slots {:?}, wait graphics_done >= {}, signal {}",
            batch.index,
            slot_indices,
            wait,
            signal
        );
        self.strategy.submit_batch(
            backend,
            &self.counters,
            BatchCommands::Dual {
                compute: compute_cb,
                graphics: graphics_cb,
                wait,
                signal,
            },
        )?;

        if batch.is_last {
            contexts.compute.set_retire_value(signal);
            contexts.graphics.set_retire_value(signal);
        }
        Ok(signal)
    }

    /// Record one batch as fill, full barrier, draw on the graphics queue.
    fn record_single_batch(
        &mut self,
        backend: &dyn GpuBackend,
        params: FrameParams,
        contexts: &mut FrameContexts<'_>,
        batch: &Batch<'_>,
        stages: &mut FrameStages<'_, R>,
        slot_indices: &mut Vec<usize>,
    ) -> Result<(), GraphicsError> {
        let index = contexts.graphics.next_command_buffer(backend)?;
        let graphics = &*contexts.graphics;
        let commands = graphics.command_buffer(index);
        backend.begin_command_buffer(commands)?;

        let cx = StageContext {
            backend,
            command_buffer: commands,
            queue: QueueKind::Graphics,
            frame_number: params.frame_number,
            batch_index: batch.index,
        };

        if batch.is_first {
            stages.graphics.prepare_frame(&cx)?;
        }

        self.acquire_slots(batch.len(), slot_indices);
        stages
            .compute
            .fill(&cx, batch.jobs, &slot_refs(&self.slots, slot_indices))?;
        backend.cmd_full_barrier(commands);

        let annotations = BatchAnnotations::build(
            params.debug_view,
            batch.index,
            batch.jobs,
            slot_indices,
            params.first_slot,
            self.slots.capacity(),
        );
        stages.graphics.draw(
            &cx,
            batch.jobs,
            &slot_refs(&self.slots, slot_indices),
            annotations.as_ref(),
        )?;

        if batch.is_last {
            stages.graphics.finish_frame(&cx)?;
        }

        backend.end_command_buffer(commands)?;
        log::trace!("Batch {}: slots {:?} (single queue)", batch.index, slot_indices);
        self.strategy.submit_batch(
            backend,
            &self.counters,
            BatchCommands::Single {
                commands,
                fence: batch.is_last.then(|| graphics.fence()),
            },
        )
    }
}

fn slot_refs<'a, R>(slots: &'a SlotPool<R>, indices: &[usize]) -> Vec<SlotRef<'a, R>> {
    indices
        .iter()
        .map(|&index| SlotRef {
            index,
            resources: slots.get(index),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::types::JobDescriptor;
    use glam::Vec3;

    #[derive(Default)]
    struct Recorder {
        filled: Vec<Vec<usize>>,
        drawn: Vec<(Vec<usize>, bool)>,
        prepared: usize,
        finished: usize,
    }

    impl ComputeStage<u32> for Recorder {
        fn fill(
            &mut self,
            cx: &StageContext<'_>,
            _jobs: &[JobDescriptor],
            slots: &[SlotRef<'_, u32>],
        ) -> Result<(), GraphicsError> {
            assert_eq!(cx.queue, QueueKind::Compute);
            self.filled.push(slots.iter().map(|s| s.index).collect());
            Ok(())
        }
    }

    impl GraphicsStage<u32> for Recorder {
        fn prepare_frame(&mut self, _cx: &StageContext<'_>) -> Result<(), GraphicsError> {
            self.prepared += 1;
            Ok(())
        }

        fn draw(
            &mut self,
            _cx: &StageContext<'_>,
            _jobs: &[JobDescriptor],
            slots: &[SlotRef<'_, u32>],
            annotations: Option<&BatchAnnotations<'_>>,
        ) -> Result<(), GraphicsError> {
            self.drawn
                .push((slots.iter().map(|s| s.index).collect(), annotations.is_some()));
            Ok(())
        }

        fn finish_frame(&mut self, _cx: &StageContext<'_>) -> Result<(), GraphicsError> {
            self.finished += 1;
            Ok(())
        }
    }

    fn jobs(count: usize) -> Vec<JobDescriptor> {
        vec![JobDescriptor::new(Vec3::ZERO, Vec3::ONE, 0.0); count]
    }

    fn contexts(backend: &dyn GpuBackend) -> (RecordingContext, RecordingContext) {
        let mut compute = RecordingContext::new(backend, QueueKind::Compute).unwrap();
        let mut graphics = RecordingContext::new(backend, QueueKind::Graphics).unwrap();
        compute.begin(backend).unwrap();
        graphics.begin(backend).unwrap();
        (compute, graphics)
    }

    #[test]
    fn test_dual_queue_frame() {
        let backend = DummyBackend::new().unwrap();
        let mut scheduler =
            BatchScheduler::new(&backend, vec![0u32; 12], SubmissionStrategy::DualQueue, 6)
                .unwrap();
        let (mut compute_ctx, mut graphics_ctx) = contexts(&backend);
        let mut compute = Recorder::default();
        let mut graphics = Recorder::default();
        let jobs = jobs(16);

        let stats = scheduler
            .record_frame(
                &backend,
                1,
                FrameContexts {
                    compute: &mut compute_ctx,
                    graphics: &mut graphics_ctx,
                },
                &FrameRequest {
                    jobs: &jobs,
                    batch_size: 6,
                    debug_view: DebugViewMode::Off,
                },
                FrameStages {
                    compute: &mut compute,
                    graphics: &mut graphics,
                },
            )
            .unwrap();
        backend.wait_idle().unwrap();

        assert_eq!(stats.batches, 3);
        assert_eq!(stats.first_slot, Some(0));
        assert_eq!(stats.first_signal, Some(1));
        assert_eq!(stats.last_signal, Some(3));
        assert_eq!(
            compute.filled,
            vec![
                (0..6).collect::<Vec<_>>(),
                (6..12).collect(),
                vec![0, 1, 2, 3]
            ]
        );
        assert_eq!(graphics.prepared, 1);
        assert_eq!(graphics.finished, 1);
        assert!(graphics.drawn.iter().all(|(_, annotated)| !annotated));
        assert_eq!(scheduler.slots().last_use(0), 3);
        assert_eq!(scheduler.slots().last_use(11), 2);
        assert_eq!(compute_ctx.retire_value(), 3);
        assert_eq!(graphics_ctx.retire_value(), 3);

        // The third batch reuses slots 0..4, last used by batch 1.
        let log = backend.submission_log();
        assert_eq!(log.len(), 6);
        assert_eq!(log[4].queue, QueueKind::Compute);
        assert_eq!(log[4].waits.len(), 1);
        assert_eq!(log[4].waits[0].1, 1);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_single_queue_frame() {
        let backend = DummyBackend::new().unwrap();
        let mut scheduler =
            BatchScheduler::new(&backend, vec![0u32; 12], SubmissionStrategy::SingleQueue, 6)
                .unwrap();
        let (mut compute_ctx, mut graphics_ctx) = contexts(&backend);
        let mut compute = Recorder::default();
        let mut graphics = Recorder::default();
        let jobs = jobs(5);

        let stats = scheduler
            .record_frame(
                &backend,
                1,
                FrameContexts {
                    compute: &mut compute_ctx,
                    graphics: &mut graphics_ctx,
                },
                &FrameRequest {
                    jobs: &jobs,
                    batch_size: 2,
                    debug_view: DebugViewMode::Bounds,
                },
                FrameStages {
                    compute: &mut ContextCheck(QueueKind::Graphics),
                    graphics: &mut graphics,
                },
            )
            .unwrap();
        backend.wait_idle().unwrap();

        assert_eq!(stats.batches, 3);
        assert_eq!(stats.first_signal, None);
        assert!(graphics.drawn.iter().all(|(_, annotated)| *annotated));
        assert_eq!(compute_ctx.used(), 0);
        assert_eq!(graphics_ctx.used(), 3);
        assert_eq!(scheduler.counters().upcoming(), 1);

        let log = backend.submission_log();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|r| r.queue == QueueKind::Graphics));
        assert_eq!(
            log.iter().map(|r| r.signals_fence).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert!(compute.filled.is_empty());
    }

    struct ContextCheck(QueueKind);

    impl ComputeStage<u32> for ContextCheck {
        fn fill(
            &mut self,
            cx: &StageContext<'_>,
            _jobs: &[JobDescriptor],
            _slots: &[SlotRef<'_, u32>],
        ) -> Result<(), GraphicsError> {
            assert_eq!(cx.queue, self.0);
            Ok(())
        }
    }

    #[test]
    fn test_empty_frame_records_nothing() {
        let backend = DummyBackend::new().unwrap();
        let mut scheduler =
            BatchScheduler::new(&backend, vec![0u32; 12], SubmissionStrategy::DualQueue, 6)
                .unwrap();
        let (mut compute_ctx, mut graphics_ctx) = contexts(&backend);
        let mut compute = Recorder::default();
        let mut graphics = Recorder::default();

        let stats = scheduler
            .record_frame(
                &backend,
                1,
                FrameContexts {
                    compute: &mut compute_ctx,
                    graphics: &mut graphics_ctx,
                },
                &FrameRequest {
                    jobs: &[],
                    batch_size: 6,
                    debug_view: DebugViewMode::Off,
                },
                FrameStages {
                    compute: &mut compute,
                    graphics: &mut graphics,
                },
            )
            .unwrap();

        assert_eq!(stats.batches, 0);
        assert_eq!(stats.first_slot, None);
        assert_eq!(graphics.prepared, 0);
        assert!(backend.submission_log().is_empty());
    }

    #[test]
    #[should_panic(expected = "batch size 7 outside 1..=6")]
    fn test_oversized_batch_panics() {
        let backend = DummyBackend::new().unwrap();
        let mut scheduler =
            BatchScheduler::new(&backend, vec![0u32; 12], SubmissionStrategy::DualQueue, 6)
                .unwrap();
        let (mut compute_ctx, mut graphics_ctx) = contexts(&backend);
        let mut compute = Recorder::default();
        let mut graphics = Recorder::default();
        let jobs = jobs(8);
        let _ = scheduler.record_frame(
            &backend,
            1,
            FrameContexts {
                compute: &mut compute_ctx,
                graphics: &mut graphics_ctx,
            },
            &FrameRequest {
                jobs: &jobs,
                batch_size: 7,
                debug_view: DebugViewMode::Off,
            },
            FrameStages {
                compute: &mut compute,
                graphics: &mut graphics,
            },
        );
    }

    #[test]
    fn test_limit_above_half_the_slots_is_rejected() {
        let backend = DummyBackend::new().unwrap();
        let result = BatchScheduler::new(&backend, vec![0u32; 8], SubmissionStrategy::DualQueue, 6);
        assert!(matches!(result, Err(GraphicsError::InvalidConfiguration(_))));
        let result = BatchScheduler::new(&backend, vec![0u32; 8], SubmissionStrategy::DualQueue, 0);
        assert!(matches!(result, Err(GraphicsError::InvalidConfiguration(_))));

        let scheduler =
            BatchScheduler::new(&backend, vec![0u32; 8], SubmissionStrategy::DualQueue, 4)
                .unwrap();
        assert_eq!(scheduler.batch_size_limit(), 4);
    }
}
