//! Application error type.

use mcubes_graphics::GraphicsError;
use thiserror::Error;

/// Errors that end a run of the application.
#[derive(Debug, Error)]
pub enum AppError {
    /// The scheduling core or its backend failed.
    #[error(transparent)]
    Graphics(#[from] GraphicsError),

    /// A command line value that parsing alone cannot reject.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
