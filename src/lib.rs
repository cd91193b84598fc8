//! # Run Tracker
//!
//! GPS run tracking core for a personal running app.
//!
//! This library provides:
//! - Geo math over GPS samples (Haversine distance, path length, pace and duration formatting)
//! - A location stream adapter with idempotent foreground/background subscriptions
//! - A pure notification projector for live run progress
//! - The run tracking engine: start/pause/resume/stop/abort lifecycle, auto-stop
//!   and hand-off of completed runs to persistence
//!
//! ## Features
//!
//! - **`persistence`** - SQLite store for completed runs, weather and settings
//! - **`http`** - Open-Meteo weather client
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use run_tracker::geo_utils::{format_distance, pace, total_distance};
//! use run_tracker::LocationSample;
//!
//! let samples = vec![
//!     LocationSample::new(37.7694, -122.4862, 0),
//!     LocationSample::new(37.7713, -122.4876, 60_000),
//!     LocationSample::new(37.7730, -122.4858, 120_000),
//! ];
//!
//! let miles = total_distance(&samples);
//! println!("{} at {}/mi", format_distance(miles), pace(miles, 120));
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, PermissionScope, Result, RunTrackError};

// Geographic utilities (distance, formatting, pace)
pub mod geo_utils;

// Time source for the engine
pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

// User settings (GPS interval, weather tracking)
pub mod settings;
pub use settings::{GpsInterval, Settings, SettingsProvider};

// Location stream adapter (foreground/background tracking)
pub mod location;
pub use location::{
    BatchDelivery, LocationBatch, LocationProvider, LocationStream, PermissionStatus,
    SubscriptionId, TrackingMode,
};

// Live run notification projection and sink contract
pub mod notification;
pub use notification::{
    project, ActionDispatcher, ActionSubscription, NotificationAction, NotificationPayload,
    NotificationProgress, NotificationSink, RUN_NOTIFICATION_ID,
};

// Completed run persistence contract
pub mod store;
pub use store::{MemoryRunStore, RunStore};

// Weather annotation of completed runs
pub mod weather;
pub use weather::{WeatherReport, WeatherService, WeatherTaskHandle};

// Run tracking state machine
pub mod engine;
pub use engine::{
    AutoStopReason, Confirmation, EngineConfig, EngineEvent, ExitDecision, RunEngine,
    RunSession, RunSnapshot, RunState,
};

// SQLite store for runs, weather and settings
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::{RunOverview, SqliteRunStore, StoredRun};

// HTTP module for weather lookup
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{OpenMeteoClient, OpenMeteoWeather};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RunTracker"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// Row id assigned to a completed run by the persistence layer.
pub type RunId = i64;

/// A single GPS fix.
///
/// Serialized with the field names used by the stored location JSON
/// (`latitude`, `longitude`, `timestamp`, `accuracy`).
///
/// # Example
/// ```
/// use run_tracker::LocationSample;
/// let sample = LocationSample::new(37.7694, -122.4862, 1_700_000_000_000).with_accuracy(4.5);
/// assert!(sample.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Wall clock time of the fix in milliseconds since epoch
    #[serde(rename = "timestamp")]
    pub timestamp_millis: i64,
    /// Horizontal accuracy in meters, if the platform reported one
    #[serde(rename = "accuracy")]
    pub accuracy_meters: Option<f64>,
}

impl LocationSample {
    /// Create a new sample with unknown accuracy.
    pub fn new(latitude: f64, longitude: f64, timestamp_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_millis,
            accuracy_meters: None,
        }
    }

    /// Attach a horizontal accuracy in meters.
    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = Some(accuracy_meters);
        self
    }

    /// Check if the sample has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// The kind of run being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum RunKind {
    /// Run until a target duration elapses
    Timed,
    /// Run until a target distance is covered
    Distance,
    /// Open-ended run, stopped manually
    Free,
}

impl RunKind {
    /// Single-character code used in the `runs.type` column.
    pub fn code(&self) -> char {
        match self {
            RunKind::Timed => 'T',
            RunKind::Distance => 'D',
            RunKind::Free => 'F',
        }
    }

    /// Parse a stored run type code.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'T' => Some(RunKind::Timed),
            'D' => Some(RunKind::Distance),
            'F' => Some(RunKind::Free),
            _ => None,
        }
    }

    /// Display label for the active run screen.
    pub fn label(&self) -> &'static str {
        match self {
            RunKind::Timed => "Timed Run",
            RunKind::Distance => "Distance Run",
            RunKind::Free => "Free Run",
        }
    }
}

/// Immutable configuration for one run.
///
/// Construction enforces that a `Timed` run carries only a positive target
/// duration, a `Distance` run only a positive target distance and a `Free`
/// run neither.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    kind: RunKind,
    target_seconds: Option<u32>,
    target_miles: Option<f64>,
}

impl RunConfig {
    /// A run that stops automatically after `target_seconds`.
    pub fn timed(target_seconds: u32) -> Result<Self> {
        Self::new(RunKind::Timed, Some(target_seconds), None)
    }

    /// A run that stops automatically after `target_miles`.
    pub fn distance(target_miles: f64) -> Result<Self> {
        Self::new(RunKind::Distance, None, Some(target_miles))
    }

    /// An open-ended run.
    pub fn free() -> Self {
        Self {
            kind: RunKind::Free,
            target_seconds: None,
            target_miles: None,
        }
    }

    /// Build a configuration from loosely-typed parts (e.g. route parameters).
    pub fn new(
        kind: RunKind,
        target_seconds: Option<u32>,
        target_miles: Option<f64>,
    ) -> Result<Self> {
        match (kind, target_seconds, target_miles) {
            (RunKind::Timed, Some(seconds), None) if seconds > 0 => Ok(Self {
                kind,
                target_seconds: Some(seconds),
                target_miles: None,
            }),
            (RunKind::Distance, None, Some(miles)) if miles.is_finite() && miles > 0.0 => {
                Ok(Self {
                    kind,
                    target_seconds: None,
                    target_miles: Some(miles),
                })
            }
            (RunKind::Free, None, None) => Ok(Self::free()),
            _ => Err(RunTrackError::ConfigError {
                message: format!(
                    "invalid {:?} run targets: seconds={:?}, miles={:?}",
                    kind, target_seconds, target_miles
                ),
            }),
        }
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    pub fn target_seconds(&self) -> Option<u32> {
        self.target_seconds
    }

    pub fn target_miles(&self) -> Option<f64> {
        self.target_miles
    }
}

/// Immutable record of a finished run, handed to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedRun {
    pub config: RunConfig,
    /// Milliseconds since epoch when tracking started
    pub started_at_millis: i64,
    /// Milliseconds since epoch when the run was stopped
    pub ended_at_millis: i64,
    /// Active time in seconds (pauses excluded)
    pub elapsed_seconds: u64,
    pub total_distance_miles: f64,
    /// Samples in arrival order
    pub samples: Vec<LocationSample>,
}

impl CompletedRun {
    /// Last recorded position, used for weather lookup.
    pub fn last_sample(&self) -> Option<&LocationSample> {
        self.samples.last()
    }

    /// Average pace as `M:SS` per mile.
    pub fn pace(&self) -> String {
        geo_utils::pace(self.total_distance_miles, self.elapsed_seconds)
    }
}

// ============================================================================
// Tests
// ============================================================================
