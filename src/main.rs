//! Application entry point for the `station-telemetry-sim` service.
//!
//! This binary simulates telemetry for monitoring stations and ingests it
//! into a time-series store on a fixed cadence. The startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Loading the device and station topology sheets
//! - Connecting the ingestion sink (InfluxDB or PostgreSQL)
//! - Building the weather cache and its janitor
//! - Spawning the device loop and the temperature/humidity loop
//! - Serving the `/health` router until the process is stopped
//!
//! # Environment Variables
//! See [`config::load_from_env`] for the full list. Logging is controlled by:
//! - `SIM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `SIM_SPAN_EVENTS` (optional) – span event mode for tracing
//! - `LOG_DIR` (optional) – also write daily-rolling JSON logs here
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating configuration parsing to `config`, topology loading to
//! `topology`, loop control to `scheduler` and route registration to `routes`.
use std::{env, io::IsTerminal, net::SocketAddr, path::Path, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use anyhow::{Context, Result};

mod batch;
mod config;
mod enrichment;
mod error;
mod models;
mod routes;
mod scheduler;
mod schema;
mod simulation;
mod sink;
mod topology;

use config::{SinkTarget, TopologySource};

use enrichment::{EnrichmentCache, OpenWeatherClient};
use scheduler::{DeviceCycle, EnrichmentCycle, IterationLimit, LoopSettings, Scheduler};
use sink::{InfluxSink, IngestionSink, PostgresSink};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    let log_dir = env::var("LOG_DIR").ok();
    let _log_guard = init_tracing(log_dir.as_deref().map(Path::new))?;

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let (devices, stations) = load_topology(&cfg.topology)?;

    let sink = connect_sink(&cfg.sink).await?;

    let weather = OpenWeatherClient::new(&cfg.weather_api_url, &cfg.weather_api_key)
        .context("failed to build weather client")?;
    let cache = Arc::new(EnrichmentCache::new(Arc::new(weather), cfg.cache_time));
    let _janitor = cache.spawn_janitor();

    let scheduler = Scheduler::new(
        sink,
        LoopSettings {
            limit: IterationLimit::from_run_times(cfg.run_times),
            interval: cfg.run_interval,
        },
    );
    let (device_loop, enrichment_loop) = scheduler.spawn(
        DeviceCycle::new(devices, &cfg.measurement, StdRng::from_entropy()),
        EnrichmentCycle::new(stations, &cfg.measurement, cache),
    );

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(routes::AppState {
        device: scheduler.device_stats(),
        enrichment: scheduler.enrichment_stats(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.health_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    // Only reached if the server stops; let finite loops finish their work.
    let devices = device_loop.await?;
    enrichment_loop.await?;
    tracing::info!(devices = devices.readings().len(), "simulation loops finished");
    Ok(())
}

// ---

/// Read the device and station sheets from the configured source.
fn load_topology(
    source: &TopologySource,
) -> Result<(Vec<models::DeviceReading>, Vec<models::EnrichmentTarget>)> {
    // ---
    match source {
        TopologySource::Workbook {
            path,
            device_sheet,
            station_sheet,
        } => topology::load_workbook(path, device_sheet, station_sheet)
            .context("failed to load topology workbook"),
        TopologySource::Csv { devices, stations } => {
            let devices =
                topology::load_devices(devices).context("failed to load device topology")?;
            let stations =
                topology::load_stations(stations).context("failed to load station topology")?;
            Ok((devices, stations))
        }
    }
}

/// Build the configured ingestion sink.
///
/// Connection failures here are fatal: without a sink there is nothing to do.
async fn connect_sink(target: &SinkTarget) -> Result<Arc<dyn IngestionSink>> {
    // ---
    match target {
        SinkTarget::Influx {
            host,
            port,
            database,
        } => {
            tracing::info!("Writing to InfluxDB at {}:{} (db {})", host, port, database);
            Ok(Arc::new(InfluxSink::new(host, *port, database)))
        }
        SinkTarget::Postgres { db_url, pool_max } => {
            let sink = PostgresSink::connect(db_url, *pool_max)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
            tracing::info!("Successfully connected to database");
            Ok(Arc::new(sink))
        }
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SIM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `SIM_LOG_LEVEL` env var
/// - When `log_dir` is given, a daily-rolling JSON file in that directory
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. The returned guard must be held for the
/// lifetime of the process so buffered file output is flushed.
fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // ---
    let span_events = match env::var("SIM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to SIM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SIM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!(
            "{level},sqlx::query=warn,hyper=info,hyper_util=info,reqwest=info"
        ))
    };

    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_ansi(use_color)
        .compact()
        .boxed();

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "station-telemetry-sim.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(guard)
}
