//! HTTP client for Open-Meteo weather lookups.
//!
//! The forecast endpoint is queried for the position where a run ended; the
//! hourly series is reduced to a single [`WeatherReport`] for the hour closest
//! to the end of the run. Hours are requested in GMT so they line up with the
//! UTC timestamps the engine records.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use reqwest::Client;

use crate::weather::{ForecastResponse, WeatherReport, WeatherService};
use crate::{LocationSample, Result, RunId, RunTrackError};

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const HOURLY_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,precipitation,wind_speed_10m,wind_direction_10m,uv_index";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Stores a fetched report against a saved run.
pub type AttachWeather = Arc<dyn Fn(RunId, &WeatherReport) -> Result<()> + Send + Sync>;

/// Open-Meteo forecast client.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(FORECAST_URL)
    }

    /// Point the client at another forecast endpoint (mirrors, local stubs).
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RunTrackError::WeatherFetchFailure {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Query parameters for a forecast at `coordinate`.
    pub fn query(coordinate: &LocationSample, metric: bool) -> Vec<(&'static str, String)> {
        let (temperature_unit, wind_speed_unit) = if metric {
            ("celsius", "kmh")
        } else {
            ("fahrenheit", "mph")
        };

        vec![
            ("latitude", coordinate.latitude.to_string()),
            ("longitude", coordinate.longitude.to_string()),
            ("hourly", HOURLY_FIELDS.to_string()),
            ("temperature_unit", temperature_unit.to_string()),
            ("wind_speed_unit", wind_speed_unit.to_string()),
            ("timezone", "GMT".to_string()),
        ]
    }

    /// Fetch the weather at `coordinate` for the hour closest to `at_millis`.
    pub async fn fetch_report(
        &self,
        coordinate: &LocationSample,
        at_millis: i64,
        metric: bool,
    ) -> Result<WeatherReport> {
        debug!(
            "[Weather] Fetching forecast for ({:.4}, {:.4})",
            coordinate.latitude, coordinate.longitude
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&Self::query(coordinate, metric))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RunTrackError::WeatherFetchFailure {
                message: format!("Weather API request failed: HTTP {}", status),
            });
        }

        let forecast: ForecastResponse = response.json().await?;
        WeatherReport::from_hourly(&forecast.hourly, at_millis, metric)
    }

    /// Blocking wrapper - runs the request on a single-threaded tokio runtime.
    pub fn fetch_report_blocking(
        &self,
        coordinate: &LocationSample,
        at_millis: i64,
        metric: bool,
    ) -> Result<WeatherReport> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                warn!("[Weather] Failed to create tokio runtime: {}", e);
                RunTrackError::WeatherFetchFailure {
                    message: format!("Runtime error: {}", e),
                }
            })?;

        runtime.block_on(self.fetch_report(coordinate, at_millis, metric))
    }
}

/// [`WeatherService`] that fetches from Open-Meteo and hands the report to a
/// storage callback.
pub struct OpenMeteoWeather {
    client: OpenMeteoClient,
    use_metric_units: bool,
    attach: AttachWeather,
}

impl OpenMeteoWeather {
    pub fn new(client: OpenMeteoClient, use_metric_units: bool, attach: AttachWeather) -> Self {
        Self {
            client,
            use_metric_units,
            attach,
        }
    }

    /// Weather service that writes into the SQLite database at `db_path`.
    #[cfg(feature = "persistence")]
    pub fn sqlite(client: OpenMeteoClient, use_metric_units: bool, db_path: &str) -> Self {
        let db_path = db_path.to_string();
        Self::new(
            client,
            use_metric_units,
            Arc::new(move |run_id, report| {
                crate::SqliteRunStore::attach_weather_at(&db_path, run_id, report).map(|_| ())
            }),
        )
    }
}

impl WeatherService for OpenMeteoWeather {
    fn fetch_and_attach(
        &self,
        run_id: RunId,
        coordinate: &LocationSample,
        ended_at_millis: i64,
    ) -> Result<()> {
        let report =
            self.client
                .fetch_report_blocking(coordinate, ended_at_millis, self.use_metric_units)?;
        (self.attach)(run_id, &report)
    }
}
