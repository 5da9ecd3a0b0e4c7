// src/routes/health.rs
//! Health check endpoint for the station telemetry simulator.
//!
//! Defines the `/health` route used by container orchestrators and operators
//! to verify that the process is up and both loops are cycling. It is a
//! sibling module in the `routes` directory and follows the Explicit Module
//! Boundary Pattern (EMBP):
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::scheduler::LoopSnapshot;

/// JSON response body for the `/health` endpoint.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    device: LoopSnapshot,
    enrichment: LoopSnapshot,
}

/// Handle `GET /health`.
///
/// Reports the counters of both loops. Reads in-memory atomics only and
/// never touches the sink or the weather API.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        device: state.device.snapshot(),
        enrichment: state.enrichment.snapshot(),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
