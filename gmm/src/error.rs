use thiserror::Error;

use crate::density::CovarianceKind;

/// Errors returned by density, mixture and training operations.
#[derive(Debug, Error)]
pub enum GmmError {
    #[error("gmm: invalid config: {0}")]
    InvalidConfig(String),

    #[error("gmm: dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("gmm: covariance kind mismatch: expected {expected:?}, got {got:?}")]
    KindMismatch {
        expected: CovarianceKind,
        got: CovarianceKind,
    },

    #[error("gmm: not enough data: need {need} samples, got {got}")]
    NotEnoughData { need: usize, got: usize },

    #[error("gmm: io: {0}")]
    Io(#[from] std::io::Error),

    #[error("gmm: invalid format: {0}")]
    InvalidFormat(String),

    #[error("gmm: worker failed: {0}")]
    Worker(String),
}
