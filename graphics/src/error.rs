//! Graphics error types.

use std::fmt;

/// Errors that can occur in the scheduling core and its backends.
///
/// Protocol violations (a batch waiting on its own signal value, a slot tag
/// moving backwards) are programming errors and panic instead of showing up
/// here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    InitializationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    FeatureNotSupported(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// Slot capacity, batch size or strategy do not fit together.
    InvalidConfiguration(String),
    /// A queue submission was rejected by the device.
    SubmissionFailed(String),
    /// A CPU-side wait on a fence or progress counter expired.
    WaitTimeout(String),
    /// A resource was reused while the GPU still had work referencing it.
    ResourceInUse(String),
    /// An internal error occurred.
    Internal(String),
}

impl GraphicsError {
    /// Whether this error means the device connection is broken.
    ///
    /// Such errors are never retried; callers propagate them and shut down.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost | Self::OutOfMemory | Self::SubmissionFailed(_) | Self::WaitTimeout(_)
        )
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::InvalidConfiguration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::SubmissionFailed(msg) => write!(f, "queue submission failed: {msg}"),
            Self::WaitTimeout(msg) => write!(f, "wait timed out: {msg}"),
            Self::ResourceInUse(msg) => write!(f, "resource still in use by the GPU: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}
