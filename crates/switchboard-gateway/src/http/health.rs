use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe with lock-manager load.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.ctx.locks.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active": stats.active,
        "queued_global": stats.queued_global,
        "adapters": ["github", "test"],
    }))
}
