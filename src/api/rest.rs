// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Every endpoint lives under `/api/v1/`. `/health` requires no authentication;
// everything else is gated behind the `AuthBearer` extractor. This surface is
// deliberately thin: session lifecycle, pause/resume, and a read-only view of
// the agent configs — the operations the orchestration core itself needs to
// be driven by something other than a test harness.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::broker::BrokerClient;
use crate::config::AgentConfigMap;
use crate::ledger::Session;
use crate::session;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router<C: BrokerClient + 'static>(state: Arc<AppState<C>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Session lifecycle ──────────────────────────────────────
        .route("/api/v1/session", get(get_session))
        .route("/api/v1/session/start", post(start_session))
        .route("/api/v1/session/end", post(end_session))
        // ── Trading control ─────────────────────────────────────────
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        // ── Agent configuration (read-only) ─────────────────────────
        .route("/api/v1/agents", get(agents))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    running: bool,
    server_time: i64,
}

async fn health<C: BrokerClient>(State(state): State<Arc<AppState<C>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        running: state.is_running(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Session lifecycle
// =============================================================================

async fn get_session<C: BrokerClient>(
    _auth: AuthBearer,
    State(state): State<Arc<AppState<C>>>,
) -> Json<Session> {
    Json(state.ledger.load_session())
}

#[derive(Deserialize, Default)]
struct StartSessionRequest {
    #[serde(default)]
    initial_balance: Option<f64>,
    #[serde(default)]
    force_new: bool,
}

async fn start_session<C: BrokerClient>(
    _auth: AuthBearer,
    State(state): State<Arc<AppState<C>>>,
    body: Option<Json<StartSessionRequest>>,
) -> Json<Session> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let session = if req.force_new {
        info!("session force-start requested via API");
        session::start_force_new(&state.ledger, &state.history_dir, req.initial_balance)
    } else {
        session::start_resume(&state.ledger, req.initial_balance)
    };
    Json(session)
}

async fn end_session<C: BrokerClient>(
    _auth: AuthBearer,
    State(state): State<Arc<AppState<C>>>,
) -> Json<Session> {
    info!("session end requested via API");
    let session = session::end(&state.ledger, &state.history_dir);
    Json(session)
}

// =============================================================================
// Trading control — toggles the loop's running flag without touching the
// session record; ending a session does not stop trading by itself.
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    running: bool,
}

async fn control_pause<C: BrokerClient>(
    _auth: AuthBearer,
    State(state): State<Arc<AppState<C>>>,
) -> Json<ControlResponse> {
    state.set_running(false);
    warn!("trading paused via API");
    Json(ControlResponse { running: false })
}

async fn control_resume<C: BrokerClient>(
    _auth: AuthBearer,
    State(state): State<Arc<AppState<C>>>,
) -> Json<ControlResponse> {
    state.set_running(true);
    info!("trading resumed via API");
    Json(ControlResponse { running: true })
}

// =============================================================================
// Agent configuration (read-only)
// =============================================================================

async fn agents<C: BrokerClient>(
    _auth: AuthBearer,
    State(state): State<Arc<AppState<C>>>,
) -> Json<AgentConfigMap> {
    Json(state.configs.read().clone())
}
