//! Headless frame loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mcubes_graphics::{
    create_backend, BackendParameters, DummyConfig, FramePipeline, FrameRequest, GpuBackend,
    SchedulerConfig, SubmissionStrategy, DEFAULT_MAX_BATCH_SIZE,
};

use crate::args::AppArgs;
use crate::error::AppError;
use crate::jobs::GridJobSource;
use crate::stages::{
    ChunkSlot, HeadlessCompute, HeadlessGraphics, HeadlessPresenter, HeadlessStats, SlotSizes,
};
use crate::time::TimeParameter;

/// Next batch size in `1..=max`, wrapping to 1.
pub fn next_batch_size(current: usize, max: usize) -> usize {
    if current >= max {
        1
    } else {
        current + 1
    }
}

/// Previous batch size in `1..=max`, wrapping to `max`.
pub fn previous_batch_size(current: usize, max: usize) -> usize {
    if current <= 1 || current > max {
        max
    } else {
        current - 1
    }
}

/// The strategy a backend can actually run, warning when it differs.
pub fn resolve_strategy(
    requested: SubmissionStrategy,
    backend: &dyn GpuBackend,
) -> SubmissionStrategy {
    if requested.uses_compute_queue() && !backend.has_dedicated_compute_queue() {
        log::warn!(
            "{} has no dedicated compute queue; falling back to {}",
            backend.name(),
            SubmissionStrategy::SingleQueue
        );
        SubmissionStrategy::SingleQueue
    } else {
        requested
    }
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub batches: u64,
    pub jobs: u64,
    /// Draws whose slot no longer held its fill's tag. Always 0 unless the
    /// scheduler is broken.
    pub corruptions: u64,
    /// Frames whose presentation executed on the device (simulated backend only).
    pub presents_executed: u64,
    pub strategy_switches: u64,
    pub final_strategy: SubmissionStrategy,
    pub elapsed: Duration,
}

/// Headless driver: builds the pipeline from [`AppArgs`] and renders frames.
///
/// # Example
///
/// ```ignore
/// use mcubes_app::{App, AppArgs, DefaultAppArgs};
///
/// let summary = App::new(DefaultAppArgs::parse()).run()?;
/// println!("{} frames", summary.frames);
/// ```
pub struct App<A: AppArgs> {
    args: A,
    backend: Option<Arc<dyn GpuBackend>>,
}

impl<A: AppArgs> App<A> {
    pub fn new(args: A) -> Self {
        Self {
            args,
            backend: None,
        }
    }

    /// Run on `backend` instead of the one the arguments select.
    pub fn with_backend(args: A, backend: Arc<dyn GpuBackend>) -> Self {
        Self {
            args,
            backend: Some(backend),
        }
    }

    fn create_backend(&self) -> Result<Arc<dyn GpuBackend>, AppError> {
        if let Some(backend) = &self.backend {
            return Ok(backend.clone());
        }
        let dummy = DummyConfig::default().with_queue_latency(self.args.dummy_latency());
        let params = BackendParameters::new()
            .with_validation(self.args.validation())
            .with_dummy_config(dummy);
        Ok(create_backend(self.args.backend(), &params)?)
    }

    /// Render until `max_frames` (or forever), then drain the device.
    pub fn run(&self) -> Result<RunSummary, AppError> {
        let args = &self.args;
        let backend = self.create_backend()?;
        let mut strategy = resolve_strategy(args.strategy(), backend.as_ref());

        let mut batch_size = args.batch_size();
        if batch_size == 0 {
            return Err(AppError::InvalidArgument(
                "batch size must be at least 1".to_string(),
            ));
        }
        // Cycling ceiling follows the ring; only the requested size can overflow it.
        let max_batch_size = batch_size.max(DEFAULT_MAX_BATCH_SIZE.min(args.slot_count() / 2));
        let config = SchedulerConfig::new()
            .with_slot_count(args.slot_count())
            .with_max_batch_size(max_batch_size)
            .with_strategy(strategy);
        config.validate(backend.as_ref())?;

        let stats = HeadlessStats::new();
        let slots =
            ChunkSlot::create_all(backend.as_ref(), config.slot_count, SlotSizes::default())?;
        let mut pipeline = FramePipeline::new(
            backend.clone(),
            &config,
            slots,
            Box::new(HeadlessCompute::new(stats.clone())),
            Box::new(HeadlessGraphics::new(stats.clone())),
            Box::new(HeadlessPresenter::new(stats.clone())),
        )?;
        let batch_size_limit = pipeline.batch_size_limit();

        if let Some(equation) = args.equation() {
            pipeline.request_equation(equation);
        }

        let mut time = TimeParameter::new(args.time_mode());
        if let Some(t) = args.manual_t() {
            time.set_t(t);
        }
        let mut source = GridJobSource::new().with_target_cells(args.target_cells());
        let mut toggle_every = args.toggle_strategy_every().filter(|&n| n > 0);
        let debug_view = args.debug_view();

        log::info!(
            "Rendering {} frames with {}, batch size {} of {}, {} slots",
            args.max_frames()
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
            strategy,
            batch_size,
            batch_size_limit,
            config.slot_count
        );

        let start = Instant::now();
        let mut jobs = Vec::new();
        let mut frames = 0u64;
        let mut batches = 0u64;
        let mut job_total = 0u64;
        let mut strategy_switches = 0u64;

        while args.max_frames().map_or(true, |max| frames < max) {
            let t = time.update(start.elapsed().as_secs_f64());
            source.generate(t, &mut jobs);

            if frames > 0 {
                if let Some(every) = toggle_every {
                    if frames % every == 0 {
                        match pipeline.request_strategy(strategy.toggled()) {
                            Ok(()) => {
                                strategy = strategy.toggled();
                                strategy_switches += 1;
                            }
                            Err(e) => {
                                log::warn!("Strategy toggling disabled: {}", e);
                                toggle_every = None;
                            }
                        }
                    }
                }
                if args.cycle_batch_size() {
                    batch_size = next_batch_size(batch_size, batch_size_limit);
                }
            }

            let frame = pipeline.render_frame(&FrameRequest {
                jobs: &jobs,
                batch_size,
                debug_view,
            })?;
            log::debug!(
                "Frame {}: {} jobs in {} batches ({}), t = {:.3}",
                frame.frame_number,
                frame.jobs,
                frame.batches,
                frame.strategy,
                t
            );

            frames += 1;
            batches += frame.batches as u64;
            job_total += frame.jobs as u64;
        }

        pipeline.wait_idle()?;
        if let Some(e) = pipeline.last_equation_error() {
            log::warn!("Equation replacement failed: {}", e);
        }

        let summary = RunSummary {
            frames,
            batches,
            jobs: job_total,
            corruptions: stats.corruptions(),
            presents_executed: stats.presents_executed.load(Ordering::Acquire),
            strategy_switches,
            final_strategy: pipeline.strategy(),
            elapsed: start.elapsed(),
        };
        log::info!(
            "Rendered {} frames ({} batches, {} jobs) in {:.2?}; {} corrupted draws",
            summary.frames,
            summary.batches,
            summary.jobs,
            summary.elapsed,
            summary.corruptions
        );
        if summary.corruptions > 0 {
            log::error!("{} slots were overwritten before they were drawn", summary.corruptions);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::DefaultAppArgs;
    use glam::IVec3;
    use mcubes_graphics::{BackendType, DummyBackend, GraphicsError};

    fn dummy_args(frames: u64) -> DefaultAppArgs {
        let _ = env_logger::builder().is_test(true).try_init();
        DefaultAppArgs::default()
            .with_backend(BackendType::Dummy)
            .with_max_frames(frames)
            .with_target_cells(IVec3::splat(254))
    }

    #[test]
    fn test_batch_size_cycles() {
        assert_eq!(next_batch_size(1, 6), 2);
        assert_eq!(next_batch_size(6, 6), 1);
        assert_eq!(previous_batch_size(1, 6), 6);
        assert_eq!(previous_batch_size(4, 6), 3);
    }

    #[test]
    fn test_run_counts_frames() {
        let summary = App::new(dummy_args(5)).run().unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.jobs, 5 * 8);
        // 8 jobs in batches of 6
        assert_eq!(summary.batches, 5 * 2);
        assert_eq!(summary.presents_executed, 5);
        assert_eq!(summary.corruptions, 0);
    }

    #[test]
    fn test_toggle_and_cycle() {
        let args = dummy_args(12)
            .with_toggle_strategy_every(3)
            .with_cycle_batch_size(true)
            .with_dummy_latency(Duration::from_micros(200));
        let summary = App::new(args).run().unwrap();
        assert_eq!(summary.strategy_switches, 3);
        assert_eq!(summary.final_strategy, SubmissionStrategy::SingleQueue);
        assert_eq!(summary.corruptions, 0);
    }

    #[test]
    fn test_falls_back_without_compute_queue() {
        let backend = Arc::new(
            DummyBackend::with_config(DummyConfig::default().with_dedicated_compute_queue(false))
                .unwrap(),
        );
        let args = dummy_args(4).with_toggle_strategy_every(2);
        let summary = App::with_backend(args, backend).run().unwrap();
        assert_eq!(summary.final_strategy, SubmissionStrategy::SingleQueue);
        assert_eq!(summary.strategy_switches, 0);
        assert_eq!(summary.corruptions, 0);
    }

    #[test]
    fn test_bad_equation_is_not_fatal() {
        let summary = App::new(dummy_args(2).with_equation("cos(t")).run().unwrap();
        assert_eq!(summary.frames, 2);
    }

    #[test]
    fn test_oversized_batch_is_configuration_error() {
        let err = App::new(dummy_args(1).with_batch_size(7)).run().unwrap_err();
        assert!(matches!(
            err,
            AppError::Graphics(GraphicsError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_small_ring_accepts_legal_batch_size() {
        let args = dummy_args(3).with_slot_count(8).with_batch_size(4);
        let summary = App::new(args).run().unwrap();
        assert_eq!(summary.frames, 3);
        // 8 jobs in batches of 4
        assert_eq!(summary.batches, 3 * 2);
        assert_eq!(summary.corruptions, 0);
    }

    #[test]
    fn test_small_ring_cycles_within_half_the_slots() {
        let args = dummy_args(9)
            .with_slot_count(4)
            .with_batch_size(1)
            .with_cycle_batch_size(true);
        let summary = App::new(args).run().unwrap();
        // Sizes 1, 2, 1, 2, ...: five frames of 8 batches, four of 4.
        assert_eq!(summary.batches, 5 * 8 + 4 * 4);
        assert_eq!(summary.corruptions, 0);
    }

    #[test]
    fn test_batch_above_half_a_small_ring_is_rejected() {
        let args = dummy_args(1).with_slot_count(7).with_batch_size(4);
        let err = App::new(args).run().unwrap_err();
        assert!(matches!(
            err,
            AppError::Graphics(GraphicsError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_larger_ring_allows_larger_batches() {
        let args = dummy_args(3).with_slot_count(16).with_batch_size(8);
        let summary = App::new(args).run().unwrap();
        assert_eq!(summary.batches, 3);
    }
}
