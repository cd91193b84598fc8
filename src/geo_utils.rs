//! Geographic utilities: Haversine distance, path length and the display
//! formatting used across the active run screen and notification.

use crate::LocationSample;

/// Earth radius used for Haversine distance, in miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Meters per statute mile.
pub const METERS_PER_MILE: f64 = 1609.34;

/// Feet per statute mile.
pub const FEET_PER_MILE: f64 = 5280.0;

/// Distances below this are displayed in feet.
const FEET_DISPLAY_THRESHOLD_MILES: f64 = 0.1;

/// Shown instead of a pace when no distance has been covered.
pub const PACE_PLACEHOLDER: &str = "--:--";

/// Great-circle distance between two samples in miles.
pub fn distance(a: &LocationSample, b: &LocationSample) -> f64 {
    haversine_miles(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Haversine distance in miles between two coordinates given in degrees.
pub fn haversine_miles(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_MILES * c
}

/// Path length of an ordered sample sequence in miles.
///
/// Sums consecutive pairs in the order given, so the result is the distance
/// travelled rather than the displacement. Fewer than two samples yield 0.
pub fn total_distance(samples: &[LocationSample]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    samples
        .windows(2)
        .map(|pair| distance(&pair[0], &pair[1]))
        .sum()
}

/// Convert miles to meters.
pub fn miles_to_meters(miles: f64) -> f64 {
    miles * METERS_PER_MILE
}

/// Format a distance: feet below 0.1 mi, otherwise miles to two decimals.
///
/// ```
/// use run_tracker::geo_utils::format_distance;
/// assert_eq!(format_distance(0.05), "264 ft");
/// assert_eq!(format_distance(1.005), "1.01 mi");
/// ```
pub fn format_distance(miles: f64) -> String {
    if miles < FEET_DISPLAY_THRESHOLD_MILES {
        return format!("{:.0} ft", round_half_up(miles * FEET_PER_MILE, 0));
    }
    format!("{:.2} mi", round_half_up(miles, 2))
}

/// Format seconds as `H:MM:SS` from one hour up, otherwise `M:SS`.
pub fn format_duration(seconds: u64) -> String {
    let (hours, minutes, secs) = hms(seconds);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Split a duration into hours, minutes and seconds.
pub fn hms(total_seconds: u64) -> (u64, u64, u64) {
    (
        total_seconds / 3600,
        (total_seconds % 3600) / 60,
        total_seconds % 60,
    )
}

/// Pace per mile as `M:SS`, or [`PACE_PLACEHOLDER`] when no distance is covered.
pub fn pace(miles: f64, seconds: u64) -> String {
    if !(miles.is_finite() && miles > 0.0) {
        return PACE_PLACEHOLDER.to_string();
    }
    let pace_seconds = seconds as f64 / miles;
    let minutes = (pace_seconds / 60.0).floor() as u64;
    let secs = (pace_seconds % 60.0).floor() as u64;
    format!("{}:{:02}", minutes, secs)
}

/// Round half away from zero at `decimals` places.
///
/// The value is first snapped to a micro-unit grid so that decimal inputs
/// like 1.005, stored as 1.00499999..., round the way they read.
fn round_half_up(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let snapped = (value * factor * 1e6).round() / 1e6;
    snapped.round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(lat: f64, lng: f64) -> LocationSample {
        LocationSample::new(lat, lng, 0)
    }

    #[test]
    fn test_distance_identical_points() {
        let a = s(37.7694, -122.4862);
        assert_eq!(distance(&a, &a), 0.0);
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        // One degree of latitude is ~69.09 miles on a 3958.8 mi sphere
        let d = distance(&s(0.0, 0.0), &s(1.0, 0.0));
        assert!((d - 69.09).abs() < 0.01, "got {}", d);
    }

    #[test]
    fn test_total_distance_short_sequences() {
        assert_eq!(total_distance(&[]), 0.0);
        assert_eq!(total_distance(&[s(1.0, 1.0)]), 0.0);
    }

    #[test]
    fn test_total_distance_is_path_length() {
        let path = vec![s(0.0, 0.0), s(0.01, 0.0), s(0.0, 0.0)];
        let expected = distance(&path[0], &path[1]) + distance(&path[1], &path[2]);
        assert!((total_distance(&path) - expected).abs() < 1e-12);
        // Out and back covers ground even though displacement is zero
        assert!(total_distance(&path) > 1.0);
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.0), "0 ft");
        assert_eq!(format_distance(0.05), "264 ft");
        assert_eq!(format_distance(0.1), "0.10 mi");
        assert_eq!(format_distance(1.005), "1.01 mi");
        assert_eq!(format_distance(26.2), "26.20 mi");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(600), "10:00");
        assert_eq!(format_duration(3599), "59:59");
        assert_eq!(format_duration(3661), "1:01:01");
    }

    #[test]
    fn test_pace() {
        assert_eq!(pace(0.0, 0), "--:--");
        assert_eq!(pace(0.0, 1234), "--:--");
        assert_eq!(pace(1.0, 480), "8:00");
        assert_eq!(pace(2.0, 965), "8:02");
        assert_eq!(pace(3.1, 1500), "8:03");
    }

    #[test]
    fn test_hms() {
        assert_eq!(hms(3661), (1, 1, 1));
        assert_eq!(hms(59), (0, 0, 59));
    }
}
