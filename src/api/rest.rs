// =============================================================================
// REST control surface — start / stop / status / snapshots
// =============================================================================
//
// Deliberately thin: every handler is a one-liner over an engine method.
// The richer dashboard (and its push socket) lives in a separate service
// that consumes the same engine event bus.
// =============================================================================

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::engine::Engine;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .route("/api/status", get(status))
        .route("/api/signals", get(signals))
        .route("/api/positions", get(positions))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

async fn start(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    match engine.start_trading().await {
        Ok(()) => Json(json!({ "ok": true })),
        Err(e) => Json(json!({ "ok": false, "error": e.to_string() })),
    }
}

#[derive(Debug, Default, Deserialize)]
struct StopRequest {
    reason: Option<String>,
}

async fn stop(
    State(engine): State<Arc<Engine>>,
    body: Option<Json<StopRequest>>,
) -> Json<serde_json::Value> {
    let reason = body.and_then(|Json(b)| b.reason);
    engine.stop_trading(reason).await;
    Json(json!({ "ok": true }))
}

async fn status(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(json!(engine.status()))
}

async fn signals(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(json!({
        "active": engine.active_signals(),
        "audit": engine.audit_signals(),
    }))
}

async fn positions(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(json!({
        "open": engine.positions(),
        "audit": engine.audit_positions(),
    }))
}
