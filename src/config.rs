//! Configuration loader for the station telemetry simulator.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

/// Parse an optional numeric environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Parse an optional string environment variable with a default value.
macro_rules! optional_env {
    ($var_name:expr, $default:expr) => {
        env::var($var_name).unwrap_or_else(|_| $default.to_string())
    };
}

pub const DEFAULT_WEATHER_API_URL: &str = "http://api.openweathermap.org/data/2.5/weather";

/// Where point batches are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// InfluxDB 1.x HTTP write endpoint.
    Influx {
        host: String,
        port: u16,
        database: String,
    },
    /// PostgreSQL / TimescaleDB.
    Postgres { db_url: String, pool_max: u32 },
}

/// Where the device and station sheets are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologySource {
    /// One `.xlsx` workbook holding both sheets.
    Workbook {
        path: PathBuf,
        device_sheet: String,
        station_sheet: String,
    },
    /// Two CSV files.
    Csv { devices: PathBuf, stations: PathBuf },
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Device and station sheets.
    pub topology: TopologySource,

    /// Cycles per loop; 0 runs until the process is stopped.
    pub run_times: u64,

    /// Sleep between cycles.
    pub run_interval: Duration,

    /// Ingestion backend.
    pub sink: SinkTarget,

    /// Measurement name written on every point.
    pub measurement: String,

    /// Lifetime of cached weather observations.
    pub cache_time: Duration,

    /// Weather API endpoint.
    pub weather_api_url: String,

    /// Weather API key.
    pub weather_api_key: String,

    /// Port for the `/health` router.
    pub health_port: u16,

    /// Directory for rolling log files, if any.
    pub log_dir: Option<PathBuf>,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `TOPOLOGY_WORKBOOK` – `.xlsx` workbook holding both sheets, or else
///   `DEVICE_TOPOLOGY_PATH` and `STATION_TOPOLOGY_PATH` (CSV files)
/// - `OPENWEATHERMAP_API_KEY` – weather API key
/// - `DATABASE_URL` – only when `SINK_KIND=postgres`
///
/// Optional:
/// - `DEVICE_SHEET` / `STATION_SHEET` – workbook sheet names
///   (default: device / temp_humidity)
/// - `RUN_TIMES` – cycles per loop, 0 = forever (default: 0)
/// - `RUN_INTERVAL_SECS` – seconds between cycles (default: 60)
/// - `SINK_KIND` – `influx` or `postgres` (default: influx)
/// - `SINK_HOST` / `SINK_PORT` / `SINK_DATABASE` – InfluxDB target
///   (default: localhost / 8086 / telemetry)
/// - `SINK_MEASUREMENT` – measurement name (default: device_data)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `CACHE_TIME_SECS` – weather cache lifetime (default: 600)
/// - `WEATHER_API_URL` – weather endpoint (default: OpenWeatherMap)
/// - `HEALTH_PORT` – health router port (default: 8080)
/// - `LOG_DIR` – enables rolling file logs in this directory
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let topology = match env::var("TOPOLOGY_WORKBOOK") {
        Ok(path) => TopologySource::Workbook {
            path: PathBuf::from(path),
            device_sheet: optional_env!("DEVICE_SHEET", "device"),
            station_sheet: optional_env!("STATION_SHEET", "temp_humidity"),
        },
        Err(_) => TopologySource::Csv {
            devices: PathBuf::from(require_env!("DEVICE_TOPOLOGY_PATH")),
            stations: PathBuf::from(require_env!("STATION_TOPOLOGY_PATH")),
        },
    };
    let weather_api_key = require_env!("OPENWEATHERMAP_API_KEY");

    let run_times = parse_env!("RUN_TIMES", u64, 0);
    let run_interval = Duration::from_secs(parse_env!("RUN_INTERVAL_SECS", u64, 60));
    let cache_time = Duration::from_secs(parse_env!("CACHE_TIME_SECS", u64, 600));
    let health_port = parse_env!("HEALTH_PORT", u16, 8080);

    let sink = match optional_env!("SINK_KIND", "influx").to_ascii_lowercase().as_str() {
        "influx" | "influxdb" => SinkTarget::Influx {
            host: optional_env!("SINK_HOST", "localhost"),
            port: parse_env!("SINK_PORT", u16, 8086),
            database: optional_env!("SINK_DATABASE", "telemetry"),
        },
        "postgres" | "postgresql" | "timescale" => SinkTarget::Postgres {
            db_url: require_env!("DATABASE_URL"),
            pool_max: parse_env!("DB_POOL_MAX", u32, 5),
        },
        other => bail!("Invalid SINK_KIND: {other} (expected influx or postgres)"),
    };

    let measurement = optional_env!("SINK_MEASUREMENT", "device_data");
    if measurement.trim().is_empty() {
        bail!("SINK_MEASUREMENT must not be empty");
    }

    Ok(Config {
        topology,
        run_times,
        run_interval,
        sink,
        measurement,
        cache_time,
        weather_api_url: optional_env!("WEATHER_API_URL", DEFAULT_WEATHER_API_URL),
        weather_api_key,
        health_port,
        log_dir: env::var("LOG_DIR").ok().map(PathBuf::from),
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords and the API key
    /// while showing all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        match &self.topology {
            TopologySource::Workbook {
                path,
                device_sheet,
                station_sheet,
            } => {
                tracing::info!("  TOPOLOGY_WORKBOOK     : {}", path.display());
                tracing::info!("  DEVICE_SHEET          : {}", device_sheet);
                tracing::info!("  STATION_SHEET         : {}", station_sheet);
            }
            TopologySource::Csv { devices, stations } => {
                tracing::info!("  DEVICE_TOPOLOGY_PATH  : {}", devices.display());
                tracing::info!("  STATION_TOPOLOGY_PATH : {}", stations.display());
            }
        }
        tracing::info!("  RUN_TIMES             : {}", self.run_times);
        tracing::info!("  RUN_INTERVAL_SECS     : {}", self.run_interval.as_secs());
        match &self.sink {
            SinkTarget::Influx {
                host,
                port,
                database,
            } => {
                tracing::info!("  SINK_KIND             : influx");
                tracing::info!("  SINK_HOST:PORT        : {}:{}", host, port);
                tracing::info!("  SINK_DATABASE         : {}", database);
            }
            SinkTarget::Postgres { db_url, pool_max } => {
                tracing::info!("  SINK_KIND             : postgres");
                tracing::info!("  DATABASE_URL          : {}", mask_db_url(db_url));
                tracing::info!("  DB_POOL_MAX           : {}", pool_max);
            }
        }
        tracing::info!("  SINK_MEASUREMENT      : {}", self.measurement);
        tracing::info!("  CACHE_TIME_SECS       : {}", self.cache_time.as_secs());
        tracing::info!("  WEATHER_API_URL       : {}", self.weather_api_url);
        tracing::info!("  OPENWEATHERMAP_API_KEY: {}", mask_secret(&self.weather_api_key));
        tracing::info!("  HEALTH_PORT           : {}", self.health_port);
        if let Some(dir) = &self.log_dir {
            tracing::info!("  LOG_DIR               : {}", dir.display());
        }
    }
}

/// Replace the password in a connection URL with `****`.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
        }
    }
    db_url.to_string()
}

/// Keep the last four characters of a secret.
fn mask_secret(secret: &str) -> String {
    // ---
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_mask_db_url() {
        // ---
        assert_eq!(
            mask_db_url("postgres://sim:hunter2@db:5432/telemetry"),
            "postgres://sim:****@db:5432/telemetry"
        );
        assert_eq!(mask_db_url("postgres://db/telemetry"), "postgres://db/telemetry");
    }

    #[test]
    fn test_mask_secret() {
        // ---
        assert_eq!(mask_secret("18638206978f9d91"), "****9d91");
        assert_eq!(mask_secret("abc"), "****");
    }
}
