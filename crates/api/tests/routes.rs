use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use api::{app, AppState};
use common::TradingMode;
use engine::StrategyManager;
use paper::{PaperBroker, DEFAULT_BALANCE};
use strategy::default_roster;

const TOKEN: &str = "test-dashboard-token";

async fn test_app() -> (Router, StrategyManager) {
    let paper = PaperBroker::manual(0.95);
    let manager = StrategyManager::new(Arc::new(paper.clone()));
    manager.register_all(default_roster()).await.unwrap();
    let state = AppState {
        manager: manager.clone(),
        trading_mode: TradingMode::Paper,
        dashboard_token: TOKEN.to_string(),
        paper: Some(paper),
    };
    (app(state), manager)
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn healthz_needs_no_token() {
    let (app, _) = test_app().await;
    let req = Request::get("/healthz").body(Body::empty()).unwrap();
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "paper");
    assert_eq!(body["strategies"], 5);
    assert_eq!(body["running"], 0);
}

#[tokio::test]
async fn protected_routes_reject_missing_or_wrong_token() {
    let (app, _) = test_app().await;

    let req = Request::get("/api/strategies").body(Body::empty()).unwrap();
    assert_eq!(call(&app, req).await.0, StatusCode::UNAUTHORIZED);

    let req = Request::get("/api/strategies")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(call(&app, req).await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn lists_and_fetches_strategies() {
    let (app, _) = test_app().await;

    let (status, body) = call(&app, request(Method::GET, "/api/strategies", None)).await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 5);
    assert_eq!(list[0]["config"]["id"], "strategy-0");
    assert_eq!(list[0]["state"], "idle");

    let (status, body) = call(&app, request(Method::GET, "/api/strategies/strategy-4", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["type"], "EVEN_ODD");

    let (status, body) = call(&app, request(Method::GET, "/api/strategies/nope", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn patch_updates_and_validates() {
    let (app, _) = test_app().await;

    let (status, body) = call(
        &app,
        request(
            Method::PATCH,
            "/api/strategies/strategy-1",
            Some(json!({ "stake": 2.5, "target_profit": 40.0 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["stake"], 2.5);
    assert_eq!(body["config"]["target_profit"], 40.0);
    assert_eq!(body["current_stake"], 2.5);

    let (status, _) = call(
        &app,
        request(
            Method::PATCH,
            "/api/strategies/strategy-1",
            Some(json!({ "stake": -1.0 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, body) = call(&app, request(Method::GET, "/api/strategies/strategy-1", None)).await;
    assert_eq!(body["config"]["stake"], 2.5);
}

#[tokio::test]
async fn lifecycle_endpoints_map_errors_to_statuses() {
    let (app, manager) = test_app().await;
    let start = "/api/strategies/strategy-0/start";

    let (status, _) = call(&app, request(Method::POST, start, None)).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);

    let (status, _) = call(
        &app,
        request(
            Method::PATCH,
            "/api/strategies/strategy-0",
            Some(json!({ "enabled": true })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, request(Method::POST, start, None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = call(&app, request(Method::POST, start, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) =
        call(&app, request(Method::POST, "/api/strategies/strategy-0/stop", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert!(manager.snapshot("strategy-0").await.unwrap().open_trades == 0);

    let (status, _) = call(
        &app,
        request(Method::POST, "/api/strategies/strategy-0/resume", None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn trades_and_account_views() {
    let (app, _) = test_app().await;

    let (status, body) = call(
        &app,
        request(Method::GET, "/api/strategies/strategy-2/trades?limit=10", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert_eq!(body["limit"], 10);
    assert!(body["trades"].as_array().unwrap().is_empty());

    let (status, body) = call(&app, request(Method::GET, "/api/account", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], DEFAULT_BALANCE);
}
