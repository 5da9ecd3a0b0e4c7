//! Turns one cycle's readings into point records.
//!
//! Row 0 of every topology sheet is its label row. It travels with the data
//! as a phantom record and is dropped here, never emitted as a point.

use rand::Rng;
use tracing::{debug, info, warn};

use crate::enrichment::EnrichmentCache;
use crate::models::{DeviceReading, EnrichmentTarget, PointRecord};
use crate::simulation::next_value;

// ---

/// Simulate every device once and build its point.
///
/// Each reading's `current_value` is overwritten with the new value so the
/// next cycle continues from it. All points share `captured_at_ms`.
pub fn build_device_batch<R: Rng + ?Sized>(
    readings: &mut [DeviceReading],
    measurement: &str,
    captured_at_ms: i64,
    rng: &mut R,
) -> Vec<PointRecord> {
    // ---
    let mut points = Vec::with_capacity(readings.len().saturating_sub(1));

    for reading in readings.iter_mut().skip(1) {
        let value = next_value(
            reading.value_min,
            reading.value_max,
            reading.current_value,
            reading.mode,
            rng,
        );
        reading.current_value = value;

        match PointRecord::new(measurement, &reading.tags, value, captured_at_ms) {
            Ok(point) => {
                debug!(device_id = %reading.tags.device_id, value, "built device point");
                points.push(point);
            }
            Err(e) => {
                warn!(device_id = %reading.tags.device_id, error = %e, "skipping malformed point");
            }
        }
    }

    info!(
        rows = readings.len(),
        points = points.len(),
        "built device batch"
    );
    points
}

/// Look up the weather for every station and build one point per row.
///
/// Rows whose kind is neither temperature nor humidity produce nothing and
/// trigger no lookup.
pub async fn build_enrichment_batch(
    targets: &[EnrichmentTarget],
    measurement: &str,
    captured_at_ms: i64,
    cache: &EnrichmentCache,
) -> Vec<PointRecord> {
    // ---
    let mut points = Vec::with_capacity(targets.len().saturating_sub(1));

    for target in targets.iter().skip(1) {
        let Some(kind) = target.kind else {
            debug!(device_id = %target.tags.device_id, "no enrichment kind, skipping row");
            continue;
        };

        let observation = cache.lookup(&target.longitude, &target.latitude).await;
        let value = observation.value_for(kind);

        match PointRecord::new(measurement, &target.tags, value, captured_at_ms) {
            Ok(point) => {
                debug!(device_id = %target.tags.device_id, ?kind, value, "built enrichment point");
                points.push(point);
            }
            Err(e) => {
                warn!(device_id = %target.tags.device_id, error = %e, "skipping malformed point");
            }
        }
    }

    info!(
        rows = targets.len(),
        points = points.len(),
        "built temperature/humidity batch"
    );
    points
}
