//! Database schema management for the PostgreSQL sink.
//!
//! Ensures the `points` table and its indexes exist before the first batch is
//! written. Applied once on startup when `SINK_KIND=postgres`.

use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// One row per point: the measurement, the capture time, the four station
/// tags and the three fields. Safe to call on every startup; no-op if objects
/// already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS points (
            id                 BIGSERIAL PRIMARY KEY,
            measurement        TEXT             NOT NULL,
            time               TIMESTAMPTZ      NOT NULL,
            station_id         TEXT             NOT NULL,
            station_gateway_id TEXT             NOT NULL,
            device_id          TEXT             NOT NULL,
            device_module_id   TEXT             NOT NULL,
            data               DOUBLE PRECISION NOT NULL,
            status             TEXT             NOT NULL,
            prefix_data        DOUBLE PRECISION NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Series lookups are by device over time
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_points_device_time
            ON points (device_id, time DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_points_station_id
            ON points (station_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
