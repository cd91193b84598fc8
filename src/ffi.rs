//! FFI bindings for mobile platforms (iOS/Android).
//!
//! This module provides the UniFFI bindings that expose the pure run tracking
//! functions to Kotlin and Swift. All FFI functions are prefixed with `ffi_`
//! to avoid naming conflicts with the internal API.

use log::warn;

use crate::geo_utils::{format_distance, format_duration, pace, total_distance};
use crate::{init_logging, project, GpsInterval, LocationSample, NotificationPayload, RunConfig, RunKind};

// ============================================================================
// Geo Math
// ============================================================================

/// Path length of a sample sequence in miles.
#[uniffi::export]
pub fn ffi_total_distance(samples: Vec<LocationSample>) -> f64 {
    init_logging();
    total_distance(&samples)
}

/// "1.50 mi" or "264 ft".
#[uniffi::export]
pub fn ffi_format_distance(miles: f64) -> String {
    format_distance(miles)
}

/// "M:SS" or "H:MM:SS".
#[uniffi::export]
pub fn ffi_format_duration(seconds: u64) -> String {
    format_duration(seconds)
}

/// Minutes per mile as "M:SS", or "--:--" before any distance is covered.
#[uniffi::export]
pub fn ffi_pace(miles: f64, seconds: u64) -> String {
    pace(miles, seconds)
}

// ============================================================================
// Notification Projection
// ============================================================================

/// Live notification content for a run.
///
/// Returns None when the kind and targets do not form a valid run.
#[uniffi::export]
pub fn ffi_project_notification(
    kind: RunKind,
    target_seconds: Option<u32>,
    target_miles: Option<f64>,
    distance_miles: f64,
    elapsed_seconds: u64,
    is_paused: bool,
) -> Option<NotificationPayload> {
    init_logging();
    let config = match RunConfig::new(kind, target_seconds, target_miles) {
        Ok(config) => config,
        Err(e) => {
            warn!("[RunTrackerRust] Invalid run for notification: {}", e);
            return None;
        }
    };
    Some(project(
        distance_miles,
        elapsed_seconds,
        &pace(distance_miles, elapsed_seconds),
        is_paused,
        &config,
    ))
}

// ============================================================================
// Settings
// ============================================================================

/// Whether `seconds` is an acceptable GPS interval (1 to 300).
#[uniffi::export]
pub fn ffi_validate_gps_interval(seconds: u32) -> bool {
    GpsInterval::new(seconds).is_ok()
}

// ============================================================================
// Weather
// ============================================================================

/// Fetch weather for a saved run and store it in the database at `db_path`.
///
/// Blocking; call from a background thread. Failures are logged and
/// reported as `false`.
#[cfg(all(feature = "http", feature = "persistence"))]
#[uniffi::export]
pub fn ffi_fetch_and_attach_weather(
    db_path: String,
    run_id: i64,
    coordinate: LocationSample,
    ended_at_millis: i64,
    use_metric_units: bool,
) -> bool {
    use crate::{OpenMeteoClient, OpenMeteoWeather, WeatherService};
    use log::debug;

    init_logging();
    debug!("[RunTrackerRust] Weather lookup for run {}", run_id);

    let client = match OpenMeteoClient::new() {
        Ok(client) => client,
        Err(e) => {
            warn!("[RunTrackerRust] {}", e);
            return false;
        }
    };
    let service = OpenMeteoWeather::sqlite(client, use_metric_units, &db_path);
    match service.fetch_and_attach(run_id, &coordinate, ended_at_millis) {
        Ok(()) => true,
        Err(e) => {
            warn!("[RunTrackerRust] Weather for run {} not saved: {}", run_id, e);
            false
        }
    }
}
