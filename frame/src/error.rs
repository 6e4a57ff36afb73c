use thiserror::Error;

use stk_gmm::GmmError;

/// Errors returned by pipeline construction and frame reads.
///
/// Stream exhaustion is not an error: [`FrameSource::read`] reports it as
/// `Ok(false)`.
///
/// [`FrameSource::read`]: crate::FrameSource::read
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame: invalid config: {0}")]
    InvalidConfig(String),

    #[error("frame: dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("frame: io: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame: invalid format: {0}")]
    InvalidFormat(String),

    #[error("frame: json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Gmm(#[from] GmmError),
}

pub(crate) fn config(msg: impl Into<String>) -> FrameError {
    FrameError::InvalidConfig(msg.into())
}
