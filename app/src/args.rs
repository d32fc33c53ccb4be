//! Command line arguments trait and default implementation.
//!
//! Uses clap for CLI parsing with:
//! - Help text (`--help`)
//! - Validation and clear error messages
//! - Warnings for options that have no effect in the chosen combination

use std::num::{NonZeroU64, NonZeroUsize};
use std::time::Duration;

use glam::IVec3;

use mcubes_graphics::{
    BackendType, DebugViewMode, SubmissionStrategy, DEFAULT_MAX_BATCH_SIZE, DEFAULT_SLOT_COUNT,
};

use crate::jobs::DEFAULT_TARGET_CELLS;
use crate::time::TimeMode;

/// Trait for reading run settings.
///
/// Implement this trait to drive [`App`](crate::App) from something other
/// than the command line. Every method has a default, so implementations
/// only override what they need.
///
/// # Example
///
/// ```ignore
/// use mcubes_app::{App, AppArgs};
/// use mcubes_graphics::BackendType;
///
/// struct SmokeTest;
///
/// impl AppArgs for SmokeTest {
///     fn parse() -> Self {
///         SmokeTest
///     }
///
///     fn backend(&self) -> BackendType {
///         BackendType::Dummy
///     }
///
///     fn max_frames(&self) -> Option<u64> {
///         Some(10)
///     }
/// }
/// ```
pub trait AppArgs: Sized {
    /// Parse command line arguments.
    fn parse() -> Self;

    /// Get the graphics backend to use.
    ///
    /// Default: `BackendType::Auto` (Vulkan, falling back to the simulated device)
    fn backend(&self) -> BackendType {
        BackendType::Auto
    }

    /// Get the submission strategy to start with.
    ///
    /// Default: `SubmissionStrategy::DualQueue`
    fn strategy(&self) -> SubmissionStrategy {
        SubmissionStrategy::DualQueue
    }

    /// Get the initial batch size.
    ///
    /// Default: 6
    fn batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }

    /// Get the number of slots in the ring.
    ///
    /// Default: 12
    fn slot_count(&self) -> usize {
        DEFAULT_SLOT_COUNT
    }

    /// Get the debug view mode.
    ///
    /// Default: `DebugViewMode::Off`
    fn debug_view(&self) -> DebugViewMode {
        DebugViewMode::Off
    }

    /// Get how `t` follows the clock.
    ///
    /// Default: `TimeMode::ZeroToTwoPi`
    fn time_mode(&self) -> TimeMode {
        TimeMode::ZeroToTwoPi
    }

    /// Get a fixed value for `t`. Setting one implies manual mode.
    fn manual_t(&self) -> Option<f32> {
        None
    }

    /// Get the target cell counts per axis.
    ///
    /// Default: 508 on every axis
    fn target_cells(&self) -> IVec3 {
        IVec3::splat(DEFAULT_TARGET_CELLS)
    }

    /// Get the maximum number of frames to process before auto-exit.
    ///
    /// Default: `None` (run indefinitely)
    fn max_frames(&self) -> Option<u64> {
        None
    }

    /// Get the interval, in frames, at which the strategy is switched.
    fn toggle_strategy_every(&self) -> Option<u64> {
        None
    }

    /// Get whether the batch size steps through `1..=max` every frame.
    fn cycle_batch_size(&self) -> bool {
        false
    }

    /// Get an equation to install before the first frame.
    fn equation(&self) -> Option<&str> {
        None
    }

    /// Get whether validation layers should be enabled.
    ///
    /// Default: `cfg!(debug_assertions)` (enabled in debug builds)
    fn validation(&self) -> bool {
        cfg!(debug_assertions)
    }

    /// Get the simulated queue latency of the dummy backend.
    fn dummy_latency(&self) -> Duration {
        Duration::ZERO
    }
}

// ============================================================================
// CLI enums (clap value enums mapped onto the library types)
// ============================================================================

/// Graphics backend selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliBackend {
    /// Vulkan if a suitable device exists, otherwise the simulated device.
    #[default]
    Auto,
    /// Native Vulkan via ash. Fails if no device supports timeline semaphores.
    Vulkan,
    /// Simulated two-queue device, no GPU required.
    Dummy,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Auto => BackendType::Auto,
            CliBackend::Vulkan => BackendType::Vulkan,
            CliBackend::Dummy => BackendType::Dummy,
        }
    }
}

/// Submission strategy selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliStrategy {
    /// Fill on the compute queue, draw on the graphics queue.
    #[default]
    DualQueue,
    /// Fill and draw in one graphics command buffer.
    SingleQueue,
}

impl From<CliStrategy> for SubmissionStrategy {
    fn from(cli: CliStrategy) -> Self {
        match cli {
            CliStrategy::DualQueue => SubmissionStrategy::DualQueue,
            CliStrategy::SingleQueue => SubmissionStrategy::SingleQueue,
        }
    }
}

/// Debug view selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliDebugView {
    #[default]
    Off,
    Bounds,
    ColorByBatch,
    ColorBySlot,
}

impl From<CliDebugView> for DebugViewMode {
    fn from(cli: CliDebugView) -> Self {
        match cli {
            CliDebugView::Off => DebugViewMode::Off,
            CliDebugView::Bounds => DebugViewMode::Bounds,
            CliDebugView::ColorByBatch => DebugViewMode::ColorByBatch,
            CliDebugView::ColorBySlot => DebugViewMode::ColorBySlot,
        }
    }
}

/// Time mode selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliTimeMode {
    Manual,
    Sawtooth,
    Triangle,
    Sine,
    #[default]
    ZeroToTwoPi,
}

impl From<CliTimeMode> for TimeMode {
    fn from(cli: CliTimeMode) -> Self {
        match cli {
            CliTimeMode::Manual => TimeMode::Manual,
            CliTimeMode::Sawtooth => TimeMode::Sawtooth,
            CliTimeMode::Triangle => TimeMode::Triangle,
            CliTimeMode::Sine => TimeMode::Sine,
            CliTimeMode::ZeroToTwoPi => TimeMode::ZeroToTwoPi,
        }
    }
}

// ============================================================================
// Default App Args
// ============================================================================

/// Default command line arguments implementation.
///
/// # Examples
///
/// ```bash
/// # Show help
/// mcubes --help
///
/// # Headless smoke test on the simulated device
/// mcubes --backend dummy --max-frames 100
///
/// # Switch strategy every 30 frames while cycling batch sizes
/// mcubes --toggle-strategy-every 30 --cycle-batch-size
///
/// # Bigger ring, bigger batches
/// mcubes --slots 20 --batch-size 10
/// ```
#[derive(Debug, Clone)]
pub struct DefaultAppArgs {
    backend: BackendType,
    strategy: SubmissionStrategy,
    batch_size: usize,
    slot_count: usize,
    debug_view: DebugViewMode,
    time_mode: TimeMode,
    manual_t: Option<f32>,
    target_cells: IVec3,
    max_frames: Option<u64>,
    toggle_strategy_every: Option<u64>,
    cycle_batch_size: bool,
    equation: Option<String>,
    validation: bool,
    dummy_latency: Duration,
}

impl Default for DefaultAppArgs {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            strategy: SubmissionStrategy::DualQueue,
            batch_size: DEFAULT_MAX_BATCH_SIZE,
            slot_count: DEFAULT_SLOT_COUNT,
            debug_view: DebugViewMode::Off,
            time_mode: TimeMode::ZeroToTwoPi,
            manual_t: None,
            target_cells: IVec3::splat(DEFAULT_TARGET_CELLS),
            max_frames: None,
            toggle_strategy_every: None,
            cycle_batch_size: false,
            equation: None,
            validation: cfg!(debug_assertions),
            dummy_latency: Duration::ZERO,
        }
    }
}

impl DefaultAppArgs {
    /// Set the graphics backend.
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Set the initial submission strategy.
    pub fn with_strategy(mut self, strategy: SubmissionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the initial batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the slot ring size.
    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    /// Set the maximum number of frames.
    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    /// Switch strategy every `frames` frames.
    pub fn with_toggle_strategy_every(mut self, frames: u64) -> Self {
        self.toggle_strategy_every = Some(frames);
        self
    }

    /// Step the batch size every frame.
    pub fn with_cycle_batch_size(mut self, cycle: bool) -> Self {
        self.cycle_batch_size = cycle;
        self
    }

    /// Install `equation` before the first frame.
    pub fn with_equation(mut self, equation: impl Into<String>) -> Self {
        self.equation = Some(equation.into());
        self
    }

    pub fn with_target_cells(mut self, cells: IVec3) -> Self {
        self.target_cells = cells;
        self
    }

    pub fn with_debug_view(mut self, debug_view: DebugViewMode) -> Self {
        self.debug_view = debug_view;
        self
    }

    pub fn with_dummy_latency(mut self, latency: Duration) -> Self {
        self.dummy_latency = latency;
        self
    }
}

// ============================================================================
// clap front end
// ============================================================================

mod native {
    use super::*;
    use clap::Parser;

    /// mcubes scheduler driver arguments.
    #[derive(Parser, Debug)]
    #[command(
        name = "mcubes",
        about = "Headless driver for the mcubes cross-queue scheduler",
        long_about = "Runs the animated isosurface frame loop without a window.\n\n\
            Every frame the bounding box is split into jobs, the jobs are batched,\n\
            compute fills one slot per job and graphics draws it. Slots are recycled\n\
            through a small ring, synchronized only by GPU-side counters.\n\
            \n\
            BACKEND SELECTION:\n\
            \n\
            • vulkan: Native Vulkan 1.2 via ash. Requires timeline semaphores.\n\
            \n\
            • dummy: Simulated two-queue device; verifies that no slot is\n\
              overwritten before it was drawn.\n\
            \n\
            EXAMPLES:\n\
              # Run headless test\n\
              mcubes --backend dummy --max-frames 10\n\
            \n\
              # Exercise deferred strategy switches\n\
              mcubes --backend dummy --max-frames 200 --toggle-strategy-every 7 --dummy-latency-ms 1",
        version
    )]
    pub(super) struct ClapArgs {
        /// Graphics backend to use.
        #[arg(long, default_value = "auto", value_enum)]
        pub backend: CliBackend,

        /// Submission strategy to start with.
        #[arg(long, default_value = "dual-queue", value_enum)]
        pub strategy: CliStrategy,

        /// Jobs per batch. At most half the slot count.
        #[arg(long)]
        pub batch_size: Option<NonZeroUsize>,

        /// Number of slots in the ring.
        #[arg(long, default_value_t = DEFAULT_SLOT_COUNT)]
        pub slots: usize,

        /// Debug overlay for drawn chunks.
        #[arg(long, default_value = "off", value_enum)]
        pub debug_view: CliDebugView,

        /// How t follows the clock.
        #[arg(long, default_value = "zero-to-two-pi", value_enum)]
        pub t_mode: CliTimeMode,

        /// Fixed value for t. Implies --t-mode manual.
        #[arg(long = "t", allow_negative_numbers = true)]
        pub t: Option<f32>,

        /// Target cell counts along x, y and z.
        #[arg(
            long,
            num_args = 3,
            value_names = ["X", "Y", "Z"],
            allow_negative_numbers = true
        )]
        pub cells: Option<Vec<i32>>,

        /// Exit after rendering N frames (useful for testing).
        #[arg(long)]
        pub max_frames: Option<u64>,

        /// Switch submission strategy every N frames.
        #[arg(long)]
        pub toggle_strategy_every: Option<NonZeroU64>,

        /// Step the batch size through 1..=max every frame.
        #[arg(long)]
        pub cycle_batch_size: bool,

        /// Equation to install before the first frame.
        #[arg(long)]
        pub equation: Option<String>,

        /// Enable GPU validation layers (slower but helps catch bugs).
        #[arg(long, conflicts_with = "no_validation")]
        pub validation: bool,

        /// Disable GPU validation layers (faster but less safe).
        #[arg(long, conflicts_with = "validation")]
        pub no_validation: bool,

        /// Simulated queue latency in milliseconds (dummy backend only).
        #[arg(long, default_value_t = 0)]
        pub dummy_latency_ms: u64,
    }

    impl From<ClapArgs> for DefaultAppArgs {
        fn from(args: ClapArgs) -> Self {
            if args.dummy_latency_ms > 0 && args.backend == CliBackend::Vulkan {
                log::warn!("--dummy-latency-ms has no effect with --backend vulkan");
            }
            if args.t.is_some() && args.t_mode != CliTimeMode::Manual {
                log::warn!(
                    "--t overrides --t-mode {:?}; t stays fixed",
                    args.t_mode
                );
            }

            // --validation forces on, --no-validation forces off, otherwise use debug default
            let validation = args.validation || (!args.no_validation && cfg!(debug_assertions));

            let target_cells = match args.cells.as_deref() {
                Some(&[x, y, z]) => IVec3::new(x, y, z),
                _ => IVec3::splat(DEFAULT_TARGET_CELLS),
            };

            Self {
                backend: args.backend.into(),
                strategy: args.strategy.into(),
                batch_size: args
                    .batch_size
                    .map_or(DEFAULT_MAX_BATCH_SIZE, NonZeroUsize::get),
                slot_count: args.slots,
                debug_view: args.debug_view.into(),
                time_mode: if args.t.is_some() {
                    TimeMode::Manual
                } else {
                    args.t_mode.into()
                },
                manual_t: args.t,
                target_cells,
                max_frames: args.max_frames,
                toggle_strategy_every: args.toggle_strategy_every.map(NonZeroU64::get),
                cycle_batch_size: args.cycle_batch_size,
                equation: args.equation,
                validation,
                dummy_latency: Duration::from_millis(args.dummy_latency_ms),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use rstest::rstest;

        fn parse(args: &[&str]) -> Result<DefaultAppArgs, clap::Error> {
            let argv = std::iter::once("mcubes").chain(args.iter().copied());
            ClapArgs::try_parse_from(argv).map(Into::into)
        }

        #[test]
        fn test_defaults() {
            let args = parse(&[]).unwrap();
            assert_eq!(args.backend(), BackendType::Auto);
            assert_eq!(args.strategy(), SubmissionStrategy::DualQueue);
            assert_eq!(args.batch_size(), DEFAULT_MAX_BATCH_SIZE);
            assert_eq!(args.slot_count(), DEFAULT_SLOT_COUNT);
            assert_eq!(args.time_mode(), TimeMode::ZeroToTwoPi);
            assert_eq!(args.target_cells(), IVec3::splat(508));
            assert_eq!(args.max_frames(), None);
        }

        #[test]
        fn test_zero_batch_size_rejected() {
            assert!(parse(&["--batch-size", "0"]).is_err());
            assert!(parse(&["--toggle-strategy-every", "0"]).is_err());
        }

        #[rstest]
        #[case::dual("dual-queue", SubmissionStrategy::DualQueue)]
        #[case::single("single-queue", SubmissionStrategy::SingleQueue)]
        fn test_strategy_names(#[case] name: &str, #[case] expected: SubmissionStrategy) {
            assert_eq!(parse(&["--strategy", name]).unwrap().strategy(), expected);
        }

        #[rstest]
        #[case::off("off", DebugViewMode::Off)]
        #[case::bounds("bounds", DebugViewMode::Bounds)]
        #[case::batch("color-by-batch", DebugViewMode::ColorByBatch)]
        #[case::slot("color-by-slot", DebugViewMode::ColorBySlot)]
        fn test_debug_view_names(#[case] name: &str, #[case] expected: DebugViewMode) {
            assert_eq!(parse(&["--debug-view", name]).unwrap().debug_view(), expected);
        }

        #[test]
        fn test_manual_t_implies_manual_mode() {
            let args = parse(&["--t-mode", "sine", "--t", "-0.5"]).unwrap();
            assert_eq!(args.time_mode(), TimeMode::Manual);
            assert_eq!(args.manual_t(), Some(-0.5));
        }

        #[test]
        fn test_cells_take_three_values() {
            let args = parse(&["--cells", "127", "254", "-3"]).unwrap();
            assert_eq!(args.target_cells(), IVec3::new(127, 254, -3));
            assert!(parse(&["--cells", "127", "254"]).is_err());
        }

        #[test]
        fn test_validation_flags_conflict() {
            assert!(parse(&["--validation", "--no-validation"]).is_err());
            assert!(parse(&["--validation"]).unwrap().validation());
            assert!(!parse(&["--no-validation"]).unwrap().validation());
        }
    }
}

impl AppArgs for DefaultAppArgs {
    fn parse() -> Self {
        use clap::Parser;
        native::ClapArgs::parse().into()
    }

    fn backend(&self) -> BackendType {
        self.backend
    }

    fn strategy(&self) -> SubmissionStrategy {
        self.strategy
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn debug_view(&self) -> DebugViewMode {
        self.debug_view
    }

    fn time_mode(&self) -> TimeMode {
        self.time_mode
    }

    fn manual_t(&self) -> Option<f32> {
        self.manual_t
    }

    fn target_cells(&self) -> IVec3 {
        self.target_cells
    }

    fn max_frames(&self) -> Option<u64> {
        self.max_frames
    }

    fn toggle_strategy_every(&self) -> Option<u64> {
        self.toggle_strategy_every
    }

    fn cycle_batch_size(&self) -> bool {
        self.cycle_batch_size
    }

    fn equation(&self) -> Option<&str> {
        self.equation.as_deref()
    }

    fn validation(&self) -> bool {
        self.validation
    }

    fn dummy_latency(&self) -> Duration {
        self.dummy_latency
    }
}
