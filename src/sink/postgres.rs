//! PostgreSQL (or TimescaleDB) sink storing one row per point.

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};

use super::{IngestionSink, WriteReport};
use crate::error::SinkError;
use crate::models::PointRecord;
use crate::schema;

// ---

pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Connect the pool and make sure the schema exists.
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        // ---
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        schema::create_schema(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl IngestionSink for PostgresSink {
    /// Insert each point on its own. A row the database rejects is skipped;
    /// losing the connection fails the batch.
    async fn write(&self, points: &[PointRecord]) -> Result<WriteReport, SinkError> {
        // ---
        let mut report = WriteReport::default();

        for point in points {
            let Some(time) = DateTime::from_timestamp_millis(point.timestamp_millis()) else {
                error!(
                    timestamp = point.timestamp_millis(),
                    "timestamp out of range, skipping point"
                );
                report.rejected += 1;
                continue;
            };

            let result = sqlx::query(
                r#"
                INSERT INTO points (
                    measurement, time,
                    station_id, station_gateway_id, device_id, device_module_id,
                    data, status, prefix_data
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(point.measurement())
            .bind(time)
            .bind(point.tag("station_id").unwrap_or_default())
            .bind(point.tag("station_gateway_id").unwrap_or_default())
            .bind(point.tag("device_id").unwrap_or_default())
            .bind(point.tag("device_module_id").unwrap_or_default())
            .bind(point.fields().data)
            .bind(point.fields().status)
            .bind(point.fields().prefix_data)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => report.written += 1,
                Err(sqlx::Error::Database(e)) => {
                    error!(
                        device_id = point.tag("device_id"),
                        error = %e,
                        "point rejected by database"
                    );
                    report.rejected += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !points.is_empty() {
            info!(
                written = report.written,
                rejected = report.rejected,
                "batch written to PostgreSQL"
            );
        }
        Ok(report)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::tests::station_tags;

    /// Needs a scratch database: `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`
    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn test_write_inserts_points() {
        // ---
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let sink = PostgresSink::connect(&url, 2).await.unwrap();

        let device_id = format!("it-{}", uuid::Uuid::new_v4());
        let tags = station_tags(&device_id);
        let points = vec![
            PointRecord::new("device_data", &tags, 1.25, 1_735_689_600_000).unwrap(),
            PointRecord::new("device_data", &tags, 2.5, 1_735_689_601_000).unwrap(),
        ];

        let report = sink.write(&points).await.unwrap();
        assert_eq!(report, WriteReport { written: 2, rejected: 0 });

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM points WHERE device_id = $1")
            .bind(&device_id)
            .fetch_one(&sink.pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
