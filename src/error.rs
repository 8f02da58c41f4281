use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Unable to create capture execution: {0}")]
    RegistrationFailed(String),

    #[error("Test id must not be empty")]
    InvalidTestId,

    #[error("Screenshot acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("Palette reduction failed: {0}")]
    CompressionFailed(String),

    #[error("Compressor timed out after {0:?}")]
    CompressionTimeout(Duration),

    #[error("Sending screenshot failed: {0}")]
    DispatchFailed(String),

    #[error("Unexpected status {status} from {endpoint}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    #[error("Pipeline is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Temp file handling around the palette-reduction tool.
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failure taxonomy of the pipeline. Every kind is absorbed at the boundary
/// of the stage that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Registration,
    Acquisition,
    Compression,
    Dispatch,
    Shutdown,
    Configuration,
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::RegistrationFailed(_) | CaptureError::InvalidTestId => {
                ErrorKind::Registration
            }
            CaptureError::AcquisitionFailed(_) => ErrorKind::Acquisition,
            CaptureError::CompressionFailed(_)
            | CaptureError::CompressionTimeout(_)
            | CaptureError::Io(_) => ErrorKind::Compression,
            CaptureError::DispatchFailed(_)
            | CaptureError::UnexpectedStatus { .. }
            | CaptureError::Serialization(_) => ErrorKind::Dispatch,
            CaptureError::ShuttingDown => ErrorKind::Shutdown,
            CaptureError::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

/// Runs a stage that must never fail the instrumented test.
///
/// The error is logged at warn level and swallowed; callers get `None`.
pub async fn fail_open<Fut, T>(stage: &str, fut: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T, CaptureError>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} failed (fail-open): {}", stage, e);
            None
        }
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for CaptureError {
    fn from(err: reqwest::Error) -> Self {
        CaptureError::DispatchFailed(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CaptureError {
    fn from(err: tokio::task::JoinError) -> Self {
        CaptureError::CompressionFailed(err.to_string())
    }
}
