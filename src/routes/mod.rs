use std::sync::Arc;

use axum::Router;

use crate::scheduler::LoopStats;

mod health;

// ---

/// Shared state for the HTTP surface: one stats handle per loop.
#[derive(Clone)]
pub struct AppState {
    // ---
    pub device: Arc<LoopStats>,
    pub enrichment: Arc<LoopStats>,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new().merge(health::router()).with_state(state)
}
