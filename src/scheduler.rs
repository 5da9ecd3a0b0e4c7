//! Periodic loops driving simulation and ingestion.
//!
//! One loop construct, [`run_loop`], serves both reading kinds. Each loop
//! owns its [`Cycle`] state exclusively, so the device values mutated in
//! cycle N are only ever seen by cycle N+1 of the same loop. The two loops
//! share nothing but the sink and the weather cache.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::batch::{build_device_batch, build_enrichment_batch};
use crate::enrichment::EnrichmentCache;
use crate::models::{DeviceReading, EnrichmentTarget, PointRecord};
use crate::sink::{IngestionSink, WriteReport};

// ---

/// How many cycles a loop runs before stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationLimit {
    Finite(u64),
    Unbounded,
}

impl IterationLimit {
    /// `0` means run until the process is stopped.
    pub fn from_run_times(run_times: u64) -> Self {
        // ---
        match run_times {
            0 => IterationLimit::Unbounded,
            n => IterationLimit::Finite(n),
        }
    }

    fn allows(self, completed: u64) -> bool {
        match self {
            IterationLimit::Finite(n) => completed < n,
            IterationLimit::Unbounded => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    // ---
    pub limit: IterationLimit,
    pub interval: Duration,
}

/// Counters for one loop, read by the health endpoint.
#[derive(Debug, Default)]
pub struct LoopStats {
    // ---
    running: AtomicBool,
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
    points_written: AtomicU64,
    points_rejected: AtomicU64,
}

/// Point-in-time copy of [`LoopStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopSnapshot {
    // ---
    pub running: bool,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub points_written: u64,
    pub points_rejected: u64,
}

impl LoopStats {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    fn record_success(&self, report: WriteReport) {
        // ---
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.points_written
            .fetch_add(report.written as u64, Ordering::Relaxed);
        self.points_rejected
            .fetch_add(report.rejected as u64, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        // ---
        LoopSnapshot {
            running: self.running.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            points_rejected: self.points_rejected.load(Ordering::Relaxed),
        }
    }
}

/// One kind of periodic work: produce the batch for a capture time.
#[async_trait]
pub trait Cycle: Send + 'static {
    fn name(&self) -> &'static str;

    async fn build(&mut self, captured_at_ms: i64) -> Vec<PointRecord>;
}

/// Simulated device readings. Owns the device state between cycles.
pub struct DeviceCycle<R> {
    // ---
    readings: Vec<DeviceReading>,
    measurement: String,
    rng: R,
}

impl<R: Rng + Send + 'static> DeviceCycle<R> {
    // ---
    pub fn new(readings: Vec<DeviceReading>, measurement: &str, rng: R) -> Self {
        Self {
            readings,
            measurement: measurement.to_string(),
            rng,
        }
    }

    pub fn readings(&self) -> &[DeviceReading] {
        &self.readings
    }
}

#[async_trait]
impl<R: Rng + Send + 'static> Cycle for DeviceCycle<R> {
    fn name(&self) -> &'static str {
        "device"
    }

    async fn build(&mut self, captured_at_ms: i64) -> Vec<PointRecord> {
        build_device_batch(
            &mut self.readings,
            &self.measurement,
            captured_at_ms,
            &mut self.rng,
        )
    }
}

/// Temperature/humidity readings at station coordinates.
pub struct EnrichmentCycle {
    // ---
    targets: Vec<EnrichmentTarget>,
    measurement: String,
    cache: Arc<EnrichmentCache>,
}

impl EnrichmentCycle {
    // ---
    pub fn new(
        targets: Vec<EnrichmentTarget>,
        measurement: &str,
        cache: Arc<EnrichmentCache>,
    ) -> Self {
        Self {
            targets,
            measurement: measurement.to_string(),
            cache,
        }
    }
}

#[async_trait]
impl Cycle for EnrichmentCycle {
    fn name(&self) -> &'static str {
        "enrichment"
    }

    async fn build(&mut self, captured_at_ms: i64) -> Vec<PointRecord> {
        build_enrichment_batch(&self.targets, &self.measurement, captured_at_ms, &self.cache).await
    }
}

/// Run `cycle` until `settings.limit` is reached, returning its final state.
///
/// Every iteration captures the time once, builds the batch, hands it to the
/// sink and sleeps. A failed write loses that cycle's batch; the loop logs it
/// and carries on with the next cycle.
pub async fn run_loop<C: Cycle>(
    mut cycle: C,
    sink: Arc<dyn IngestionSink>,
    settings: LoopSettings,
    stats: Arc<LoopStats>,
) -> C {
    // ---
    let name = cycle.name();
    stats.running.store(true, Ordering::Relaxed);
    info!(kind = name, limit = ?settings.limit, interval = ?settings.interval, "loop started");

    let mut completed = 0u64;
    while settings.limit.allows(completed) {
        completed += 1;

        let span = info_span!(
            "cycle",
            kind = name,
            iteration = completed,
            batch_id = %Uuid::new_v4()
        );
        async {
            let captured_at_ms = Utc::now().timestamp_millis();
            let points = cycle.build(captured_at_ms).await;
            if points.is_empty() {
                warn!("cycle produced no points");
            }

            match sink.write(&points).await {
                Ok(report) => stats.record_success(report),
                Err(e) => {
                    stats.record_failure();
                    error!(
                        sink = sink.name(),
                        points = points.len(),
                        error = %e,
                        "batch lost, continuing with next cycle"
                    );
                }
            }
        }
        .instrument(span)
        .await;

        if settings.limit.allows(completed) {
            tokio::time::sleep(settings.interval).await;
        }
    }

    stats.running.store(false, Ordering::Relaxed);
    info!(kind = name, cycles = completed, "loop stopped");
    cycle
}

/// Drives the device loop and the enrichment loop side by side.
pub struct Scheduler {
    // ---
    sink: Arc<dyn IngestionSink>,
    settings: LoopSettings,
    device_stats: Arc<LoopStats>,
    enrichment_stats: Arc<LoopStats>,
}

impl Scheduler {
    // ---
    pub fn new(sink: Arc<dyn IngestionSink>, settings: LoopSettings) -> Self {
        Self {
            sink,
            settings,
            device_stats: Arc::new(LoopStats::new()),
            enrichment_stats: Arc::new(LoopStats::new()),
        }
    }

    pub fn device_stats(&self) -> Arc<LoopStats> {
        self.device_stats.clone()
    }

    pub fn enrichment_stats(&self) -> Arc<LoopStats> {
        self.enrichment_stats.clone()
    }

    /// Spawn both loops. Neither waits for the other.
    pub fn spawn<D: Cycle, E: Cycle>(
        &self,
        devices: D,
        enrichment: E,
    ) -> (JoinHandle<D>, JoinHandle<E>) {
        // ---
        let device = tokio::spawn(run_loop(
            devices,
            self.sink.clone(),
            self.settings,
            self.device_stats.clone(),
        ));
        let enrichment = tokio::spawn(run_loop(
            enrichment,
            self.sink.clone(),
            self.settings,
            self.enrichment_stats.clone(),
        ));
        (device, enrichment)
    }
}
