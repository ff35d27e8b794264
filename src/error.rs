//! Error types for zerolss.

use thiserror::Error;

/// Result type alias for zerolss operations.
pub type Result<T> = std::result::Result<T, ZeroLssError>;

/// Errors that can occur while configuring or evaluating a distribution head.
#[derive(Error, Debug)]
pub enum ZeroLssError {
    /// Invalid configuration value (response function, stabilization, loss, quantile level).
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),
    /// Shape mismatch in arrays.
    #[error("Shape mismatch: expected {expected_shape}, got {actual_shape}")]
    ShapeMismatch {
        expected_shape: String,
        actual_shape: String,
    },
    /// A configuration document could not be parsed or written.
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// A generic error from the argmin crate.
    #[error("Argmin error: {0}")]
    ArgminError(String),
}

impl From<argmin::core::Error> for ZeroLssError {
    fn from(err: argmin::core::Error) -> Self {
        ZeroLssError::ArgminError(err.to_string())
    }
}

impl From<serde_json::Error> for ZeroLssError {
    fn from(err: serde_json::Error) -> Self {
        ZeroLssError::SerializationError(err.to_string())
    }
}
