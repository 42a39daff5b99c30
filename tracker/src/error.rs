//! Error types for TaskPulse.
//!
//! Each concern has its own error enum next to the code that raises it.
//! [`TrackerError`] aggregates them for callers that drive the whole system.

use thiserror::Error;

use crate::config::ConfigError;
use crate::lifecycle::{ErrorKind, LifecycleError};
use crate::probe::ProbeError;

/// Errors that can occur during tracker operations.
///
/// This is the primary error type for the crate, encompassing all possible
/// failure modes.
///
/// # Examples
///
/// ```
/// use taskpulse::error::TrackerError;
/// use taskpulse::lifecycle::LifecycleError;
///
/// let err: TrackerError = LifecycleError::NoCurrentTask.into();
/// assert_eq!(err.to_string(), "no task is currently in progress");
/// ```
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// JSON serialization error outside the store, such as `status --json`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session probe error.
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Task lifecycle error. Displayed as-is since these are user-facing.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl TrackerError {
    /// Returns the lifecycle error kind, if this wraps a lifecycle error.
    #[must_use]
    pub fn lifecycle_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Lifecycle(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// A specialized `Result` type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
