use thiserror::Error;

/// Errors surfaced by [`ScanController`](crate::capture::ScanController) operations.
///
/// Perception noise (no pose, low confidence) never shows up here; it is absorbed as
/// feedback by the analyzer and debouncer.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("camera unavailable: {0}")]
    Device(String),

    #[error("pose model unavailable: {0}")]
    PoseModel(String),

    #[error("failed to save scan: {0}")]
    Persistence(String),

    #[error("not allowed right now: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ScanError {
    pub(crate) fn device(err: anyhow::Error) -> Self {
        ScanError::Device(format!("{err:#}"))
    }

    pub(crate) fn persistence(err: anyhow::Error) -> Self {
        ScanError::Persistence(format!("{err:#}"))
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
