mod auth;
mod error;
pub mod routes;

use std::net::SocketAddr;

use axum::{middleware, Router};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use common::TradingMode;
use engine::StrategyManager;
use paper::PaperBroker;

pub use error::ApiError;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: StrategyManager,
    pub trading_mode: TradingMode,
    pub dashboard_token: String,
    /// Present in paper mode so the simulated account can be inspected.
    pub paper: Option<PaperBroker>,
}

/// Assemble the full router. Everything except `/healthz` and the event
/// socket (which checks its own query token) sits behind bearer auth.
pub fn app(state: AppState) -> Router {
    let protected = routes::strategy_router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_auth,
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(protected)
        .merge(routes::ws_router())
        .merge(routes::health_router())
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(cors)
}

/// Bind and run the control API until the listener fails.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Control API listening");
    axum::serve(listener, app(state)).await
}
