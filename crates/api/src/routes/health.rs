use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let step = state.orchestrator.current_step().await;
    Json(json!({
        "status": "ok",
        "step": step.to_string(),
        "inFlight": state.orchestrator.is_in_flight(),
    }))
}
