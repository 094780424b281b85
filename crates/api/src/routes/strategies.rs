use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use engine::StrategySnapshot;
use strategy::StrategyPatch;

use crate::{ApiError, AppState};

type ApiResult<T> = Result<T, ApiError>;

pub fn strategy_router() -> Router<AppState> {
    Router::new()
        .route("/api/strategies", get(list_strategies))
        .route(
            "/api/strategies/:id",
            get(get_strategy).patch(patch_strategy),
        )
        .route("/api/strategies/:id/trades", get(get_trades))
        .route("/api/strategies/:id/start", post(start_strategy))
        .route("/api/strategies/:id/stop", post(stop_strategy))
        .route("/api/strategies/:id/pause", post(pause_strategy))
        .route("/api/strategies/:id/resume", post(resume_strategy))
        .route("/api/account", get(get_account))
}

// ─── Roster ───────────────────────────────────────────────────────────────────

async fn list_strategies(State(state): State<AppState>) -> Json<Vec<StrategySnapshot>> {
    Json(state.manager.snapshots().await)
}

async fn get_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StrategySnapshot>> {
    Ok(Json(state.manager.snapshot(&id).await?))
}

async fn patch_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<StrategyPatch>,
) -> ApiResult<Json<StrategySnapshot>> {
    let snapshot = state.manager.update(&id, &patch).await?;
    info!(strategy = %id, "Strategy updated via API");
    Ok(Json(snapshot))
}

// ─── Trades ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TradesQuery {
    limit: Option<usize>,
}

/// Most recent trades first.
async fn get_trades(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<TradesQuery>,
) -> ApiResult<Json<Value>> {
    let trades = state.manager.trades(&id).await?;
    let total = trades.len();
    let limit = q.limit.unwrap_or(50).min(500);
    let recent: Vec<_> = trades.into_iter().rev().take(limit).collect();
    Ok(Json(json!({ "trades": recent, "total": total, "limit": limit })))
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

async fn start_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<StrategySnapshot>)> {
    state.manager.start(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(state.manager.snapshot(&id).await?)))
}

async fn stop_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StrategySnapshot>> {
    state.manager.stop(&id).await?;
    Ok(Json(state.manager.snapshot(&id).await?))
}

async fn pause_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<StrategySnapshot>)> {
    state.manager.pause(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(state.manager.snapshot(&id).await?)))
}

async fn resume_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<StrategySnapshot>)> {
    state.manager.resume(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(state.manager.snapshot(&id).await?)))
}

// ─── Account ──────────────────────────────────────────────────────────────────

async fn get_account(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match &state.paper {
        Some(paper) => (
            StatusCode::OK,
            Json(json!({
                "mode": state.trading_mode.to_string(),
                "balance": paper.balance().await,
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "account view is only available in paper mode" })),
        ),
    }
}
