//! InfluxDB 1.x sink speaking line protocol over HTTP.

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::{IngestionSink, WriteReport};
use crate::error::SinkError;
use crate::models::PointRecord;

// ---

/// Writes batches to `http://host:port/write` with millisecond precision.
///
/// No request timeout is set: a slow server stalls the calling loop rather
/// than dropping its batch.
pub struct InfluxSink {
    // ---
    client: reqwest::Client,
    write_url: String,
    database: String,
}

impl InfluxSink {
    // ---
    pub fn new(host: &str, port: u16, database: &str) -> Self {
        // ---
        Self {
            client: reqwest::Client::new(),
            write_url: format!("http://{host}:{port}/write"),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl IngestionSink for InfluxSink {
    async fn write(&self, points: &[PointRecord]) -> Result<WriteReport, SinkError> {
        // ---
        if points.is_empty() {
            return Ok(WriteReport::default());
        }

        let body = points
            .iter()
            .map(to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");
        debug!(points = points.len(), bytes = body.len(), "sending batch to InfluxDB");

        let response = self
            .client
            .post(&self.write_url)
            .query(&[("db", self.database.as_str()), ("precision", "ms")])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(points = points.len(), "batch written to InfluxDB");
            return Ok(WriteReport {
                written: points.len(),
                rejected: 0,
            });
        }

        let body = response.text().await.unwrap_or_default();

        // InfluxDB stores the valid points and reports the rest.
        if status.as_u16() == 400 && body.contains("partial write") {
            let rejected = parse_dropped(&body).unwrap_or(1).min(points.len());
            error!(rejected, %body, "InfluxDB dropped points from batch");
            return Ok(WriteReport {
                written: points.len() - rejected,
                rejected,
            });
        }

        Err(SinkError::Write {
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &'static str {
        "influx"
    }
}

/// Render one point as a line protocol row.
///
/// `measurement,tag=value,... data=<f>,prefix_data=<f>,status="1" <ms>`
pub(crate) fn to_line_protocol(point: &PointRecord) -> String {
    // ---
    let mut line = escape_measurement(point.measurement());

    // An empty tag value is invalid line protocol; such tags are left out.
    for (key, value) in point.tags().iter().filter(|(_, v)| !v.is_empty()) {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    let fields = point.fields();
    line.push_str(&format!(
        " data={},prefix_data={},status=\"{}\" {}",
        fields.data,
        fields.prefix_data,
        escape_string_field(fields.status),
        point.timestamp_millis()
    ));
    line
}

fn escape_measurement(value: &str) -> String {
    value.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escapes tag keys and tag values.
fn escape_key(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn escape_string_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Extract `dropped=N` from a partial-write error body.
fn parse_dropped(body: &str) -> Option<usize> {
    // ---
    let start = body.find("dropped=")? + "dropped=".len();
    let digits: String = body[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
