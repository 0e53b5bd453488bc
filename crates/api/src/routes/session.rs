use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

use common::{Address, SessionStep, TradingSession};

use crate::{auth::require_auth, AppState};

pub fn session_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/session", get(get_session).delete(end_session))
        .route("/api/session/initialize", post(initialize))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

// ─── Views ────────────────────────────────────────────────────────────────────

/// Session fields safe to expose. Credentials never leave the process.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    owner_address: Address,
    custodial_address: Address,
    is_custodial_deployed: bool,
    has_api_credentials: bool,
    has_approvals: bool,
    last_checked: DateTime<Utc>,
}

impl From<&TradingSession> for SessionSummary {
    fn from(s: &TradingSession) -> Self {
        Self {
            owner_address: s.owner_address,
            custodial_address: s.custodial_address,
            is_custodial_deployed: s.is_custodial_deployed,
            has_api_credentials: s.usable_credentials().is_some(),
            has_approvals: s.has_approvals,
            last_checked: s.last_checked,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorView {
    message: String,
    precondition: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    step: SessionStep,
    in_flight: bool,
    owner_address: Option<Address>,
    custodial_address: Option<Address>,
    session: Option<SessionSummary>,
    last_error: Option<ErrorView>,
}

// ─── Handlers ─────────────────────────────────────────────────────────────────

async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    let orch = &state.orchestrator;
    let session = orch.session().await;
    let last_error = orch.last_error().await.map(|e| ErrorView {
        message: e.to_string(),
        precondition: e.is_precondition(),
    });

    Json(SessionView {
        step: orch.current_step().await,
        in_flight: orch.is_in_flight(),
        owner_address: orch.owner(),
        custodial_address: orch.custodial_address(),
        session: session.as_ref().map(SessionSummary::from),
        last_error,
    })
}

/// Start an activation in the background. Progress is read back through
/// `GET /api/session`.
async fn initialize(State(state): State<AppState>) -> Response {
    if state.orchestrator.is_in_flight() {
        return (
            StatusCode::ACCEPTED,
            Json(json!({"status": "already_running"})),
        )
            .into_response();
    }

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.initialize().await {
            debug!(error = %e, "Background activation ended with an error");
        }
    });
    (StatusCode::ACCEPTED, Json(json!({"status": "started"}))).into_response()
}

async fn end_session(State(state): State<AppState>) -> Response {
    match state.orchestrator.end().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(error = %e, "Failed to end session");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}
