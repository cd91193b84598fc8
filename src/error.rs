//! Unified error handling for the run-tracker library.
//!
//! Every collaborator failure the engine can observe is mapped onto one of
//! these kinds before it crosses a public API boundary.

use std::fmt;

/// Which location permission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    Foreground,
    Background,
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionScope::Foreground => write!(f, "foreground"),
            PermissionScope::Background => write!(f, "background"),
        }
    }
}

/// Unified error type for run-tracker operations.
#[derive(Debug, Clone, PartialEq)]
pub enum RunTrackError {
    /// Location permission was not granted
    PermissionDenied { scope: PermissionScope },
    /// The location stream could not begin delivering samples
    TrackingStartFailure { message: String },
    /// A completed run could not be saved
    PersistenceFailure { message: String },
    /// The sensor produced no samples for a tick
    TransientSensorGap,
    /// Weather lookup or attach failed
    WeatherFetchFailure { message: String },
    /// Configuration error
    ConfigError { message: String },
    /// Operation is not valid in the engine's current state
    InvalidState {
        state: String,
        operation: &'static str,
    },
}

impl RunTrackError {
    /// Whether the same operation may succeed if retried within this session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RunTrackError::PersistenceFailure { .. })
    }

    /// Whether the error ends the run attempt (user must leave and retry).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunTrackError::PermissionDenied { .. } | RunTrackError::TrackingStartFailure { .. }
        )
    }
}

impl fmt::Display for RunTrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunTrackError::PermissionDenied { scope } => {
                write!(f, "Location permission denied ({})", scope)
            }
            RunTrackError::TrackingStartFailure { message } => {
                write!(f, "Failed to start location tracking: {}", message)
            }
            RunTrackError::PersistenceFailure { message } => {
                write!(f, "Persistence error: {}", message)
            }
            RunTrackError::TransientSensorGap => {
                write!(f, "Location sensor temporarily unavailable")
            }
            RunTrackError::WeatherFetchFailure { message } => {
                write!(f, "Weather fetch failed: {}", message)
            }
            RunTrackError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            RunTrackError::InvalidState { state, operation } => {
                write!(f, "Cannot {} while run is {}", operation, state)
            }
        }
    }
}

impl std::error::Error for RunTrackError {}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for RunTrackError {
    fn from(e: rusqlite::Error) -> Self {
        RunTrackError::PersistenceFailure {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for RunTrackError {
    fn from(e: reqwest::Error) -> Self {
        RunTrackError::WeatherFetchFailure {
            message: e.to_string(),
        }
    }
}

/// Result type alias for run-tracker operations.
pub type Result<T> = std::result::Result<T, RunTrackError>;

/// Extension trait for converting Option to RunTrackError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a configuration error.
    fn ok_or_config(self, message: &str) -> Result<T>;

    /// Convert Option to Result with a persistence error.
    fn ok_or_persistence(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_config(self, message: &str) -> Result<T> {
        self.ok_or_else(|| RunTrackError::ConfigError {
            message: message.to_string(),
        })
    }

    fn ok_or_persistence(self, message: &str) -> Result<T> {
        self.ok_or_else(|| RunTrackError::PersistenceFailure {
            message: message.to_string(),
        })
    }
}
