//! Ingestion sinks for point batches.
//!
//! A sink either accepts the batch, possibly dropping individual points it
//! cannot store, or fails the whole batch with a [`SinkError`]. Failed
//! batches are not retried.

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::PointRecord;

mod influx;
mod postgres;

pub use influx::InfluxSink;
pub use postgres::PostgresSink;

// ---

/// Outcome of a batch the sink accepted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    // ---
    pub written: usize,
    pub rejected: usize,
}

/// Durable destination for point batches.
#[async_trait]
pub trait IngestionSink: Send + Sync + 'static {
    /// Write one batch. Empty batches are accepted without any I/O.
    async fn write(&self, points: &[PointRecord]) -> Result<WriteReport, SinkError>;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;
}
