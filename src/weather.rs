//! Weather annotation for completed runs.
//!
//! After a run is saved the engine hands the last known position to a
//! [`WeatherService`] on a background thread. Nothing about the weather
//! lookup can fail or delay run completion; errors end up in the log and in
//! the optional [`WeatherTaskHandle`].
//!
//! The pure helpers here map an Open-Meteo hourly forecast onto the stored
//! weather record (precipitation category, cardinal wind direction, the hour
//! closest to the end of the run).

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use chrono::NaiveDateTime;
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::{LocationSample, Result, RunId, RunTrackError};

/// Precipitation category stored with a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precipitation {
    Minimal,
    Light,
    Heavy,
    Storm,
    Snow,
}

impl Precipitation {
    pub fn code(&self) -> &'static str {
        match self {
            Precipitation::Minimal => "M",
            Precipitation::Light => "L",
            Precipitation::Heavy => "H",
            Precipitation::Storm => "ST",
            Precipitation::Snow => "SN",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Precipitation::Minimal),
            "L" => Some(Precipitation::Light),
            "H" => Some(Precipitation::Heavy),
            "ST" => Some(Precipitation::Storm),
            "SN" => Some(Precipitation::Snow),
            _ => None,
        }
    }
}

/// Eight-point compass direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindDirection {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl WindDirection {
    const ALL: [WindDirection; 8] = [
        WindDirection::N,
        WindDirection::NE,
        WindDirection::E,
        WindDirection::SE,
        WindDirection::S,
        WindDirection::SW,
        WindDirection::W,
        WindDirection::NW,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            WindDirection::N => "N",
            WindDirection::NE => "NE",
            WindDirection::E => "E",
            WindDirection::SE => "SE",
            WindDirection::S => "S",
            WindDirection::SW => "SW",
            WindDirection::W => "W",
            WindDirection::NW => "NW",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.code() == code)
    }
}

/// Weather observed at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    /// Start of the forecast hour used, milliseconds since epoch
    pub observed_at_millis: i64,
    /// In the units requested (Celsius or Fahrenheit)
    pub temperature: f64,
    pub precipitation: Option<Precipitation>,
    /// In the units requested (km/h or mph)
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<WindDirection>,
    /// Relative humidity in percent
    pub humidity: Option<f64>,
    pub uv_index: Option<i32>,
}

/// Hourly series from an Open-Meteo forecast response.
///
/// Times are expected in UTC (`timezone=GMT`), formatted `YYYY-MM-DDTHH:MM`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HourlySeries {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_direction_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub uv_index: Vec<Option<f64>>,
}

/// Top level Open-Meteo forecast response.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResponse {
    pub hourly: HourlySeries,
}

impl WeatherReport {
    /// Pick the hour closest to `target_millis` and convert it to a report.
    pub fn from_hourly(hourly: &HourlySeries, target_millis: i64, metric: bool) -> Result<Self> {
        let times: Vec<i64> = hourly
            .time
            .iter()
            .map(|t| parse_hour(t))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| weather_error("unparseable forecast time"))?;

        let index = closest_hour_index(&times, target_millis)
            .ok_or_else(|| weather_error("forecast has no hours"))?;

        let at = |series: &[Option<f64>]| series.get(index).copied().flatten();

        let temperature = at(&hourly.temperature_2m)
            .ok_or_else(|| weather_error("forecast hour has no temperature"))?;
        let celsius = if metric {
            temperature
        } else {
            fahrenheit_to_celsius(temperature)
        };

        Ok(Self {
            observed_at_millis: times[index],
            temperature,
            precipitation: at(&hourly.precipitation).map(|mm| precipitation_category(mm, celsius)),
            wind_speed: at(&hourly.wind_speed_10m),
            wind_direction: at(&hourly.wind_direction_10m).map(cardinal_direction),
            humidity: at(&hourly.relative_humidity_2m),
            uv_index: at(&hourly.uv_index).map(|uv| uv.round() as i32),
        })
    }
}

/// Categorize hourly precipitation; anything falling below freezing is snow.
pub fn precipitation_category(millimeters: f64, temperature_celsius: f64) -> Precipitation {
    if millimeters == 0.0 {
        return Precipitation::Minimal;
    }
    if temperature_celsius < 0.0 {
        return Precipitation::Snow;
    }
    if millimeters < 2.5 {
        Precipitation::Light
    } else if millimeters < 10.0 {
        Precipitation::Heavy
    } else {
        Precipitation::Storm
    }
}

/// Map a bearing in degrees to the nearest of eight compass points.
pub fn cardinal_direction(degrees: f64) -> WindDirection {
    let index = ((degrees / 45.0).round() as i64).rem_euclid(8) as usize;
    WindDirection::ALL[index]
}

/// Index of the time closest to `target_millis`; the first wins ties.
pub fn closest_hour_index(times_millis: &[i64], target_millis: i64) -> Option<usize> {
    times_millis
        .iter()
        .enumerate()
        .min_by_key(|&(_, &t)| (t - target_millis).abs())
        .map(|(i, _)| i)
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

fn parse_hour(time: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn weather_error(message: &str) -> RunTrackError {
    RunTrackError::WeatherFetchFailure {
        message: message.to_string(),
    }
}

/// Looks up weather for a saved run and attaches it to the stored record.
pub trait WeatherService: Send + Sync {
    fn fetch_and_attach(
        &self,
        run_id: RunId,
        coordinate: &LocationSample,
        ended_at_millis: i64,
    ) -> Result<()>;
}

/// Handle for a background weather lookup.
pub struct WeatherTaskHandle {
    receiver: Receiver<Result<()>>,
}

impl WeatherTaskHandle {
    /// Check if the lookup is complete (non-blocking).
    pub fn try_recv(&self) -> Option<Result<()>> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the lookup to complete (blocking).
    pub fn recv(self) -> Option<Result<()>> {
        self.receiver.recv().ok()
    }
}

/// Run `service` on its own thread. Failures are logged and never propagated.
pub fn spawn_weather_task(
    service: Arc<dyn WeatherService>,
    run_id: RunId,
    coordinate: LocationSample,
    ended_at_millis: i64,
) -> WeatherTaskHandle {
    let (sender, receiver) = mpsc::channel();

    thread::spawn(move || {
        let result = service
            .fetch_and_attach(run_id, &coordinate, ended_at_millis)
            .map_err(|e| match e {
                RunTrackError::WeatherFetchFailure { .. } => e,
                other => weather_error(&other.to_string()),
            });

        match &result {
            Ok(()) => info!("[Weather] Attached weather to run {}", run_id),
            Err(e) => error!("[Weather] Run {}: {}", run_id, e),
        }
        let _ = sender.send(result);
    });

    WeatherTaskHandle { receiver }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precipitation_category() {
        assert_eq!(precipitation_category(0.0, -5.0), Precipitation::Minimal);
        assert_eq!(precipitation_category(1.0, -0.5), Precipitation::Snow);
        assert_eq!(precipitation_category(2.4, 10.0), Precipitation::Light);
        assert_eq!(precipitation_category(2.5, 10.0), Precipitation::Heavy);
        assert_eq!(precipitation_category(10.0, 10.0), Precipitation::Storm);
        assert_eq!(Precipitation::Snow.code(), "SN");
    }

    #[test]
    fn test_cardinal_direction() {
        assert_eq!(cardinal_direction(0.0), WindDirection::N);
        assert_eq!(cardinal_direction(22.0), WindDirection::N);
        assert_eq!(cardinal_direction(23.0), WindDirection::NE);
        assert_eq!(cardinal_direction(180.0), WindDirection::S);
        assert_eq!(cardinal_direction(350.0), WindDirection::N);
        assert_eq!(cardinal_direction(292.5), WindDirection::NW);
    }

    #[test]
    fn test_closest_hour_index() {
        assert_eq!(closest_hour_index(&[], 5), None);
        assert_eq!(closest_hour_index(&[0, 3_600_000, 7_200_000], 4_000_000), Some(1));
        assert_eq!(closest_hour_index(&[0, 10], 5), Some(0));
    }

    #[test]
    fn test_report_from_imperial_hourly() {
        let json = r#"{
            "hourly": {
                "time": ["2024-01-15T07:00", "2024-01-15T08:00", "2024-01-15T09:00"],
                "temperature_2m": [28.0, 30.2, 33.0],
                "relative_humidity_2m": [80.0, 75.0, 70.0],
                "precipitation": [0.0, 1.2, 0.0],
                "wind_speed_10m": [5.0, 6.5, 7.0],
                "wind_direction_10m": [90.0, 200.0, 270.0],
                "uv_index": [0.0, 1.6, 2.0]
            }
        }"#;
        let response: ForecastResponse = serde_json::from_str(json).unwrap();

        // 2024-01-15T08:10Z
        let target = parse_hour("2024-01-15T08:10").unwrap();
        let report = WeatherReport::from_hourly(&response.hourly, target, false).unwrap();

        assert_eq!(report.observed_at_millis, parse_hour("2024-01-15T08:00").unwrap());
        assert_eq!(report.temperature, 30.2);
        // 30.2F is below freezing, so the 1.2mm falls as snow
        assert_eq!(report.precipitation, Some(Precipitation::Snow));
        assert_eq!(report.wind_direction, Some(WindDirection::S));
        assert_eq!(report.uv_index, Some(2));
        assert_eq!(report.humidity, Some(75.0));
    }

    #[test]
    fn test_report_requires_temperature() {
        let hourly = HourlySeries {
            time: vec!["2024-01-15T07:00".to_string()],
            temperature_2m: vec![None],
            ..Default::default()
        };
        assert!(matches!(
            WeatherReport::from_hourly(&hourly, 0, true),
            Err(RunTrackError::WeatherFetchFailure { .. })
        ));
    }

    struct FailingService;

    impl WeatherService for FailingService {
        fn fetch_and_attach(&self, _: RunId, _: &LocationSample, _: i64) -> Result<()> {
            Err(RunTrackError::PersistenceFailure {
                message: "no such run".to_string(),
            })
        }
    }

    #[test]
    fn test_task_reports_failure_as_weather_error() {
        let handle = spawn_weather_task(
            Arc::new(FailingService),
            7,
            LocationSample::new(37.77, -122.48, 0),
            0,
        );
        assert!(matches!(
            handle.recv(),
            Some(Err(RunTrackError::WeatherFetchFailure { .. }))
        ));
    }
}
