//! User settings consumed at run start.

use serde::{Deserialize, Serialize};

use crate::{Result, RunTrackError};

/// GPS sampling interval for foreground tracking, 1..=300 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct GpsInterval(u32);

impl GpsInterval {
    pub const MIN_SECONDS: u32 = 1;
    pub const MAX_SECONDS: u32 = 300;
    pub const DEFAULT_SECONDS: u32 = 5;

    /// Validate an interval. Out-of-range values are rejected, not clamped.
    pub fn new(seconds: u32) -> Result<Self> {
        if !(Self::MIN_SECONDS..=Self::MAX_SECONDS).contains(&seconds) {
            return Err(RunTrackError::ConfigError {
                message: format!(
                    "GPS interval must be between {} and {} seconds, got {}",
                    Self::MIN_SECONDS,
                    Self::MAX_SECONDS,
                    seconds
                ),
            });
        }
        Ok(Self(seconds))
    }

    pub fn seconds(&self) -> u32 {
        self.0
    }
}

impl Default for GpsInterval {
    fn default() -> Self {
        Self(Self::DEFAULT_SECONDS)
    }
}

impl TryFrom<u32> for GpsInterval {
    type Error = RunTrackError;

    fn try_from(seconds: u32) -> Result<Self> {
        Self::new(seconds)
    }
}

impl From<GpsInterval> for u32 {
    fn from(interval: GpsInterval) -> u32 {
        interval.0
    }
}

/// User preferences relevant to run tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    pub gps_interval: GpsInterval,
    /// Attach weather to completed runs
    pub weather_tracking_enabled: bool,
    /// Report weather in metric units
    pub use_metric_units: bool,
}

/// Source of settings, read once when a run starts.
pub trait SettingsProvider: Send {
    /// Raw GPS interval as stored; validated by [`SettingsProvider::settings`].
    fn gps_interval_seconds(&self) -> Result<u32>;

    fn weather_tracking_enabled(&self) -> Result<bool>;

    fn use_metric_units(&self) -> Result<bool>;

    /// Read and validate all settings.
    fn settings(&self) -> Result<Settings> {
        Ok(Settings {
            gps_interval: GpsInterval::new(self.gps_interval_seconds()?)?,
            weather_tracking_enabled: self.weather_tracking_enabled()?,
            use_metric_units: self.use_metric_units()?,
        })
    }
}

impl SettingsProvider for Settings {
    fn gps_interval_seconds(&self) -> Result<u32> {
        Ok(self.gps_interval.seconds())
    }

    fn weather_tracking_enabled(&self) -> Result<bool> {
        Ok(self.weather_tracking_enabled)
    }

    fn use_metric_units(&self) -> Result<bool> {
        Ok(self.use_metric_units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_interval_bounds() {
        assert!(GpsInterval::new(0).is_err());
        assert_eq!(GpsInterval::new(1).unwrap().seconds(), 1);
        assert_eq!(GpsInterval::new(300).unwrap().seconds(), 300);
        assert!(GpsInterval::new(301).is_err());
        assert_eq!(GpsInterval::default().seconds(), 5);
    }

    #[test]
    fn test_gps_interval_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<GpsInterval>("600").is_err());
        assert_eq!(serde_json::from_str::<GpsInterval>("30").unwrap().seconds(), 30);
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.gps_interval.seconds(), 5);
        assert!(!settings.weather_tracking_enabled);
        assert!(!settings.use_metric_units);
        assert_eq!(settings.settings().unwrap(), settings);
    }

    struct RawSettings(u32);

    impl SettingsProvider for RawSettings {
        fn gps_interval_seconds(&self) -> Result<u32> {
            Ok(self.0)
        }
        fn weather_tracking_enabled(&self) -> Result<bool> {
            Ok(false)
        }
        fn use_metric_units(&self) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_provider_validates_interval() {
        assert!(matches!(
            RawSettings(0).settings(),
            Err(RunTrackError::ConfigError { .. })
        ));
        assert!(RawSettings(60).settings().is_ok());
    }
}
