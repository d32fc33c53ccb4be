//! # mcubes app
//!
//! Headless driver for the mcubes cross-queue scheduler.
//!
//! The app splits a bounding box into chunk jobs every frame, animates the
//! field parameter `t` and feeds both through a
//! [`FramePipeline`](mcubes_graphics::FramePipeline) whose stages tag and
//! verify every slot, so a run doubles as a check of the slot reuse protocol.
//!
//! ## Overview
//!
//! - [`App`] - Builds the pipeline and runs the frame loop
//! - [`AppArgs`] - Trait for reading run settings
//! - [`GridJobSource`] - Splits the bounding box into jobs
//! - [`TimeParameter`] - Animation of `t`
//! - [`stages`] - Headless fill, draw and present stages
//!
//! ## Example
//!
//! ```ignore
//! use mcubes_app::{App, AppArgs, DefaultAppArgs};
//!
//! fn main() -> Result<(), mcubes_app::AppError> {
//!     let summary = App::new(DefaultAppArgs::parse()).run()?;
//!     assert_eq!(summary.corruptions, 0);
//!     Ok(())
//! }
//! ```

mod app;
mod args;
mod error;
pub mod jobs;
pub mod stages;
pub mod time;

pub use app::{next_batch_size, previous_batch_size, resolve_strategy, App, RunSummary};
pub use args::{AppArgs, CliBackend, CliDebugView, CliStrategy, CliTimeMode, DefaultAppArgs};
pub use error::AppError;
pub use jobs::GridJobSource;
pub use time::{TimeMode, TimeParameter};

/// App library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the app version. Call once at startup.
pub fn init() {
    log::info!("mcubes app v{} initialized", VERSION);
}
