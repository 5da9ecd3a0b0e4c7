//! Error kinds of the simulator.
//!
//! Only [`SinkError`] ever ends a cycle early. Lookup and point errors are
//! absorbed where they happen and replaced with safe defaults; topology
//! errors only occur at startup.

use thiserror::Error;

// ---

/// A point failed validation and is skipped individually.
#[derive(Error, Debug)]
pub enum PointError {
    #[error("measurement name is empty")]
    EmptyMeasurement,

    #[error("field '{field}' is not finite: {value}")]
    NonFiniteField { field: &'static str, value: f64 },
}

/// The weather lookup failed; callers fall back to a zero observation.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("weather API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("weather response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The whole batch could not be written. Fatal to the current cycle only.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("sink rejected batch: {status} - {body}")]
    Write { status: u16, body: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The topology source could not be read.
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("failed to open topology file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read topology row: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to read topology workbook: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("row {row} has {found} columns, expected at least {expected}")]
    ShortRow {
        row: usize,
        found: usize,
        expected: usize,
    },
}
