use thiserror::Error;
use crate::nn::fused::FusedKind;

/// Failures raised by the primitive layers. Composite layers return them unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("{operation}: shape mismatch, expected {expected}, got {got}")]
    ShapeMismatch {
        operation: &'static str,
        expected: String,
        got: String,
    },

    #[error("{expected} backward received a cache produced by {got}")]
    InvalidCacheKind { expected: FusedKind, got: FusedKind },

    #[error("{operation}: numerical instability, {reason}")]
    NumericalInstability {
        operation: &'static str,
        reason: String,
    },
}

pub type LayerResult<T> = Result<T, LayerError>;

impl LayerError {
    pub(crate) fn shape_mismatch(operation: &'static str, expected: impl ToString, got: impl ToString) -> Self {
        LayerError::ShapeMismatch {
            operation,
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

/// Shapes are printed the way ndarray prints them, e.g. `[2, 3]`.
pub(crate) fn fmt_shape(shape: &[usize]) -> String {
    format!("{:?}", shape)
}
