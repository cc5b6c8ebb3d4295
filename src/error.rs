//! Failure taxonomy for the camera, inference, and time-lapse core.
//!
//! Plumbing (config, database, model files) uses `anyhow`. The operations the
//! HTTP surface calls return `CoreError` so each failure maps to a status code
//! without string matching.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// The capture device could not be opened or stopped producing frames.
    DeviceUnavailable(String),
    /// The live feed is paused.
    FeedPaused,
    /// No classification model was loaded at startup.
    ModelUnavailable,
    /// Inference retries were exhausted.
    InferenceFailed { attempts: u32, last_error: String },
    /// Caller supplied an out-of-range argument.
    InvalidArgument(String),
    /// A time-lapse job is already active.
    AlreadyRunning,
    /// No time-lapse job is active.
    NotRunning,
    /// A frame could not be encoded.
    Encode(String),
    /// A capture could not be written to disk or recorded.
    Persistence(String),
}

impl CoreError {
    /// HTTP status used when this error reaches the API surface.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::DeviceUnavailable(_) | CoreError::FeedPaused => 503,
            CoreError::InvalidArgument(_) | CoreError::AlreadyRunning | CoreError::NotRunning => {
                400
            }
            CoreError::ModelUnavailable
            | CoreError::InferenceFailed { .. }
            | CoreError::Encode(_)
            | CoreError::Persistence(_) => 500,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::DeviceUnavailable(reason) => write!(f, "camera unavailable: {}", reason),
            CoreError::FeedPaused => write!(f, "feed is paused"),
            CoreError::ModelUnavailable => write!(f, "inference model or labels not loaded"),
            CoreError::InferenceFailed {
                attempts,
                last_error,
            } => write!(
                f,
                "failed to perform inference after {} attempts: {}",
                attempts, last_error
            ),
            CoreError::InvalidArgument(reason) => write!(f, "invalid argument: {}", reason),
            CoreError::AlreadyRunning => write!(f, "time-lapse already running"),
            CoreError::NotRunning => write!(f, "no time-lapse running"),
            CoreError::Encode(reason) => write!(f, "frame encode failed: {}", reason),
            CoreError::Persistence(reason) => write!(f, "persistence failed: {}", reason),
        }
    }
}

impl std::error::Error for CoreError {}
