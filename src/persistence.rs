//! # SQLite Run Store
//!
//! Local database for completed runs, their GPS samples, weather and user
//! settings.
//!
//! ## Tables
//!
//! - `runs`: one row per completed run (type, start/end, duration, miles,
//!   rating, note) referencing its samples and optional weather
//! - `locationData`: the run's samples as a single JSON document
//! - `weather`: conditions at the end of a run, attached after the save
//! - `settings`: key/value user preferences
//!
//! The schema is versioned through `PRAGMA user_version`.

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::weather::WeatherReport;
use crate::{
    CompletedRun, GpsInterval, LocationSample, OptionExt, Result, RunId, RunKind, RunStore,
    RunTrackError, SettingsProvider,
};

const SCHEMA_VERSION: i32 = 1;

const GPS_INTERVAL_KEY: &str = "gpsIntervalSeconds";
const WEATHER_TRACKING_KEY: &str = "weatherTrackingEnabled";
const METRIC_UNITS_KEY: &str = "useMetricUnits";

// ============================================================================
// Types
// ============================================================================

/// A saved run as listed in history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRun {
    pub id: RunId,
    pub kind: RunKind,
    /// ISO-8601 UTC
    pub start: String,
    /// ISO-8601 UTC
    pub end: String,
    /// Active seconds, pauses excluded
    pub duration_seconds: i64,
    pub miles: f64,
    pub steps: i64,
    /// 0 until the user rates the run, then 1..=5
    pub rating: i64,
    pub note: Option<String>,
    pub weather_id: Option<i64>,
    pub location_data_id: Option<i64>,
}

/// Lifetime totals for the overview screen.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RunOverview {
    pub run_count: u32,
    pub total_miles: f64,
    pub total_seconds: i64,
}

// ============================================================================
// Store
// ============================================================================

/// Completed run store backed by SQLite.
pub struct SqliteRunStore {
    db: Connection,

    /// Database path (for opening connections on background threads)
    db_path: String,
}

impl SqliteRunStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) the database at `db_path` and migrate it.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::migrate(&db)?;
        info!("[RunStore] Opened {}", db_path);

        Ok(Self {
            db,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version >= SCHEMA_VERSION {
            debug!("[RunStore] Schema at version {}", version);
            return Ok(());
        }

        info!(
            "[RunStore] Migrating schema {} -> {}",
            version, SCHEMA_VERSION
        );
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS weather (
                id INTEGER PRIMARY KEY NOT NULL,
                date TEXT NOT NULL,
                temperature REAL NOT NULL,
                precipitation TEXT CHECK (precipitation IN ('M', 'L', 'H', 'ST', 'SN')),
                windSpeed REAL,
                windDirection TEXT CHECK (windDirection IN ('N', 'NE', 'E', 'SE', 'S', 'SW', 'W', 'NW')),
                airQuality INTEGER,
                humidity REAL,
                uvIndex INTEGER
            );

            -- Samples are stored as one JSON document per run
            CREATE TABLE IF NOT EXISTS locationData (
                id INTEGER PRIMARY KEY NOT NULL,
                json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY NOT NULL,
                type TEXT NOT NULL CHECK (type IN ('T', 'D', 'F')),
                "start" TEXT NOT NULL,
                "end" TEXT NOT NULL,
                duration INTEGER NOT NULL,
                locationDataId INTEGER,
                miles REAL NOT NULL,
                steps INTEGER NOT NULL DEFAULT 0,
                weatherId INTEGER,
                rating INTEGER NOT NULL DEFAULT 0,
                note TEXT,
                FOREIGN KEY (weatherId) REFERENCES weather(id),
                FOREIGN KEY (locationDataId) REFERENCES locationData(id)
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_start ON runs("start");

            INSERT OR IGNORE INTO settings (key, value) VALUES ('gpsIntervalSeconds', '5');
            INSERT OR IGNORE INTO settings (key, value) VALUES ('weatherTrackingEnabled', 'false');
            INSERT OR IGNORE INTO settings (key, value) VALUES ('useMetricUnits', 'false');

            PRAGMA user_version = 1;
        "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Insert the samples and the run row in one transaction.
    fn insert_run(&mut self, run: &CompletedRun) -> Result<RunId> {
        let json = serde_json::to_string(&run.samples).map_err(|e| {
            RunTrackError::PersistenceFailure {
                message: format!("Failed to encode samples: {}", e),
            }
        })?;
        let start = iso8601(run.started_at_millis)?;
        let end = iso8601(run.ended_at_millis)?;

        let tx = self.db.transaction()?;
        tx.execute("INSERT INTO locationData (json) VALUES (?)", params![json])?;
        let location_data_id = tx.last_insert_rowid();

        tx.execute(
            r#"INSERT INTO runs (type, "start", "end", duration, locationDataId, miles, steps, rating, note)
               VALUES (?, ?, ?, ?, ?, ?, 0, 0, NULL)"#,
            params![
                run.config.kind().code().to_string(),
                start,
                end,
                run.elapsed_seconds as i64,
                location_data_id,
                run.total_distance_miles,
            ],
        )?;
        let run_id = tx.last_insert_rowid();
        tx.commit()?;

        info!(
            "[RunStore] Saved run {} ({:.2} mi, {} samples)",
            run_id,
            run.total_distance_miles,
            run.samples.len()
        );
        Ok(run_id)
    }

    /// Get a single run.
    pub fn get_run(&self, run_id: RunId) -> Result<Option<StoredRun>> {
        let run = self
            .db
            .query_row(
                &format!("{} WHERE id = ?", SELECT_RUN),
                params![run_id],
                row_to_stored_run,
            )
            .optional()?;
        Ok(run)
    }

    /// All runs, newest first.
    pub fn list_runs(&self) -> Result<Vec<StoredRun>> {
        let mut stmt = self
            .db
            .prepare(&format!(r#"{} ORDER BY "start" DESC, id DESC"#, SELECT_RUN))?;
        let runs = stmt
            .query_map([], row_to_stored_run)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Samples recorded for a run, in the order they were recorded.
    pub fn load_samples(&self, run_id: RunId) -> Result<Vec<LocationSample>> {
        let json: Option<String> = self
            .db
            .query_row(
                "SELECT l.json FROM runs r JOIN locationData l ON l.id = r.locationDataId WHERE r.id = ?",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => serde_json::from_str(&json).map_err(|e| RunTrackError::PersistenceFailure {
                message: format!("Corrupt location data for run {}: {}", run_id, e),
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Lifetime totals across all runs.
    pub fn overview(&self) -> Result<RunOverview> {
        let overview = self.db.query_row(
            "SELECT COUNT(*), COALESCE(SUM(miles), 0), COALESCE(SUM(duration), 0) FROM runs",
            [],
            |row| {
                Ok(RunOverview {
                    run_count: row.get(0)?,
                    total_miles: row.get(1)?,
                    total_seconds: row.get(2)?,
                })
            },
        )?;
        Ok(overview)
    }

    /// Record the user's rating (1..=5 stars) and note for a run.
    pub fn rate_run(&mut self, run_id: RunId, rating: u8, note: Option<&str>) -> Result<()> {
        if !(1..=5).contains(&rating) {
            return Err(RunTrackError::ConfigError {
                message: format!("Rating must be between 1 and 5, got {}", rating),
            });
        }
        let updated = self.db.execute(
            "UPDATE runs SET rating = ?, note = ? WHERE id = ?",
            params![rating, note, run_id],
        )?;
        if updated == 0 {
            return Err(RunTrackError::PersistenceFailure {
                message: format!("Run {} not found", run_id),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Weather
    // ========================================================================

    /// Store `report` and link it to the run.
    pub fn attach_weather(&mut self, run_id: RunId, report: &WeatherReport) -> Result<i64> {
        insert_weather(&mut self.db, run_id, report)
    }

    /// Attach weather through a fresh connection to `db_path`.
    ///
    /// Used from the weather thread, which cannot share the store's connection.
    pub fn attach_weather_at(db_path: &str, run_id: RunId, report: &WeatherReport) -> Result<i64> {
        let mut db = Connection::open(db_path)?;
        insert_weather(&mut db, run_id, report)
    }

    /// Weather attached to a run, if any.
    pub fn get_weather(&self, run_id: RunId) -> Result<Option<WeatherReport>> {
        let row = self
            .db
            .query_row(
                "SELECT w.date, w.temperature, w.precipitation, w.windSpeed, w.windDirection, w.humidity, w.uvIndex
                 FROM runs r JOIN weather w ON w.id = r.weatherId WHERE r.id = ?",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, Option<i32>>(6)?,
                    ))
                },
            )
            .optional()?;

        let (date, temperature, precipitation, wind_speed, wind_direction, humidity, uv_index) =
            match row {
                Some(row) => row,
                None => return Ok(None),
            };

        let observed_at_millis = DateTime::parse_from_rfc3339(&date)
            .map_err(|e| RunTrackError::PersistenceFailure {
                message: format!("Corrupt weather date '{}': {}", date, e),
            })?
            .timestamp_millis();

        Ok(Some(WeatherReport {
            observed_at_millis,
            temperature,
            precipitation: precipitation.as_deref().and_then(crate::weather::Precipitation::from_code),
            wind_speed,
            wind_direction: wind_direction.as_deref().and_then(crate::weather::WindDirection::from_code),
            humidity,
            uv_index,
        }))
    }

    // ========================================================================
    // Settings
    // ========================================================================

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&mut self, key: &str, value: &str) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        debug!("[RunStore] Setting {} = {}", key, value);
        Ok(())
    }

    fn get_flag(&self, key: &str) -> Result<bool> {
        Ok(self.get_setting(key)?.map_or(false, |v| v == "true"))
    }

    /// Set the GPS interval; values outside 1..=300 seconds are rejected.
    pub fn set_gps_interval(&mut self, seconds: u32) -> Result<()> {
        let interval = GpsInterval::new(seconds)?;
        self.set_setting(GPS_INTERVAL_KEY, &interval.seconds().to_string())
    }

    pub fn set_weather_tracking_enabled(&mut self, enabled: bool) -> Result<()> {
        self.set_setting(WEATHER_TRACKING_KEY, &enabled.to_string())
    }

    pub fn set_use_metric_units(&mut self, enabled: bool) -> Result<()> {
        self.set_setting(METRIC_UNITS_KEY, &enabled.to_string())
    }
}

impl RunStore for SqliteRunStore {
    fn save_completed_run(&mut self, run: &CompletedRun) -> Result<RunId> {
        self.insert_run(run)
    }
}

impl SettingsProvider for SqliteRunStore {
    fn gps_interval_seconds(&self) -> Result<u32> {
        match self.get_setting(GPS_INTERVAL_KEY)? {
            Some(value) => value.parse().map_err(|_| RunTrackError::ConfigError {
                message: format!("Stored GPS interval '{}' is not a number", value),
            }),
            None => Ok(GpsInterval::default().seconds()),
        }
    }

    fn weather_tracking_enabled(&self) -> Result<bool> {
        self.get_flag(WEATHER_TRACKING_KEY)
    }

    fn use_metric_units(&self) -> Result<bool> {
        self.get_flag(METRIC_UNITS_KEY)
    }
}

// ============================================================================
// Helpers
// ============================================================================

const SELECT_RUN: &str = r#"SELECT id, type, "start", "end", duration, miles, steps, rating, note, weatherId, locationDataId FROM runs"#;

fn row_to_stored_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRun> {
    let code: String = row.get(1)?;
    let kind = code
        .chars()
        .next()
        .and_then(RunKind::from_code)
        .ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown run type '{}'", code).into(),
            )
        })?;

    Ok(StoredRun {
        id: row.get(0)?,
        kind,
        start: row.get(2)?,
        end: row.get(3)?,
        duration_seconds: row.get(4)?,
        miles: row.get(5)?,
        steps: row.get(6)?,
        rating: row.get(7)?,
        note: row.get(8)?,
        weather_id: row.get(9)?,
        location_data_id: row.get(10)?,
    })
}

fn insert_weather(db: &mut Connection, run_id: RunId, report: &WeatherReport) -> Result<i64> {
    let date = iso8601(report.observed_at_millis)?;

    let tx = db.transaction()?;
    tx.execute(
        "INSERT INTO weather (date, temperature, precipitation, windSpeed, windDirection, humidity, uvIndex)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            date,
            report.temperature,
            report.precipitation.map(|p| p.code()),
            report.wind_speed,
            report.wind_direction.map(|d| d.code()),
            report.humidity,
            report.uv_index,
        ],
    )?;
    let weather_id = tx.last_insert_rowid();

    let updated = tx.execute(
        "UPDATE runs SET weatherId = ? WHERE id = ?",
        params![weather_id, run_id],
    )?;
    if updated == 0 {
        // Dropping the transaction rolls back the orphaned weather row
        return Err(RunTrackError::PersistenceFailure {
            message: format!("Run {} not found", run_id),
        });
    }
    tx.commit()?;

    debug!("[RunStore] Weather {} attached to run {}", weather_id, run_id);
    Ok(weather_id)
}

fn iso8601(millis: i64) -> Result<String> {
    let at: DateTime<Utc> = DateTime::from_timestamp_millis(millis)
        .ok_or_persistence(&format!("Timestamp {} out of range", millis))?;
    Ok(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

// ============================================================================
// Tests
// ============================================================================
