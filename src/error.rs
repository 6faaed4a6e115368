//! Error types for layer and loss operations.

use thiserror::Error;

/// Errors raised by layers and loss functions.
///
/// Every variant describes a programming error in the surrounding model code
/// (wrong shapes, bad hyperparameters, calls out of order). None of them are
/// transient, so callers should not retry.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("{op}: invalid shape, expected {expected}, got {actual:?}")]
    InvalidShape {
        op: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("{op}: invalid configuration: {message}")]
    InvalidConfiguration { op: &'static str, message: String },

    #[error("target class {index} out of range for {classes} classes")]
    InvalidTarget { index: usize, classes: usize },

    #[error("{layer}: backward called without a preceding forward")]
    BackwardWithoutForward { layer: &'static str },

    #[error("{layer}: forward called while the previous forward still awaits backward")]
    ForwardPending { layer: &'static str },

    #[error("reshape failed: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl LayerError {
    pub(crate) fn shape(op: &'static str, expected: impl Into<String>, actual: &[usize]) -> Self {
        LayerError::InvalidShape {
            op,
            expected: expected.into(),
            actual: actual.to_vec(),
        }
    }

    pub(crate) fn config(op: &'static str, message: impl Into<String>) -> Self {
        LayerError::InvalidConfiguration {
            op,
            message: message.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T, E = LayerError> = std::result::Result<T, E>;
