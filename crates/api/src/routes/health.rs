use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let snapshots = state.manager.snapshots().await;
    let running = snapshots.iter().filter(|s| s.state.is_active()).count();
    Json(json!({
        "status": "ok",
        "mode": state.trading_mode.to_string(),
        "broker_authorized": state.manager.broker().is_authorized(),
        "strategies": snapshots.len(),
        "running": running,
    }))
}
