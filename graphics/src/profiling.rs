//! Profiling support via Tracy.
//!
//! Instrumentation is enabled with the `profiling` Cargo feature:
//!
//! ```bash
//! cargo run -p mcubes-app --features profiling
//! ```
//!
//! Then connect the Tracy client to the running process. The scheduler marks
//! each frame, opens a span per batch, and plots the progress counters so the
//! overlap of the two queues is visible on the timeline.
//!
//! ```ignore
//! use mcubes_graphics::profiling::{frame_mark, profile_plot, profile_scope};
//!
//! fn record_batch() {
//!     profile_scope!("record_batch");
//!     // ...
//! }
//!
//! loop {
//!     // ... render frame ...
//!     profile_plot!("compute_done", compute_done);
//!     frame_mark!();
//! }
//! ```
//!
//! When profiling is disabled (the default), all macros compile to no-ops.

#[cfg(feature = "profiling")]
pub use tracy_client::{self, frame_mark as tracy_frame_mark, plot as tracy_plot, span, Client};

/// Mark the end of a frame for Tracy's frame analysis.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

/// Mark the end of a frame (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! frame_mark {
    () => {};
}

/// Create a profiling span that ends with the current scope.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

/// Create a profiling span (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Create a profiling span named after the enclosing function.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_function {
    () => {
        let _profile_span = $crate::profiling::span!();
    };
}

/// Create a function span (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_function {
    () => {};
}

/// Plot a value over time in Tracy.
///
/// ```ignore
/// profile_plot!("frames_in_flight", in_flight);
/// ```
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        $crate::profiling::tracy_plot!($name, $value as f64)
    };
}

/// Plot a value (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        let _ = $value;
    };
}

/// Name the current thread in Tracy.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! set_thread_name {
    ($name:expr) => {
        $crate::profiling::tracy_client::set_thread_name!($name)
    };
}

/// Set thread name (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! set_thread_name {
    ($name:expr) => {};
}

/// Send a message to Tracy's message log.
///
/// Used for rare events such as a strategy switch or an equation reload.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_message {
    ($msg:expr) => {
        if let Some(client) = $crate::profiling::Client::running() {
            client.message($msg, 0);
        }
    };
}

/// Send a message (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_message {
    ($msg:expr) => {
        let _ = $msg;
    };
}

pub use frame_mark;
pub use profile_function;
pub use profile_message;
pub use profile_plot;
pub use profile_scope;
pub use set_thread_name;
