//! HTTP surface: router assembly plus the small read-only admin API.

pub mod webhooks;
pub mod ws;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

use crate::orchestrator::{self, InboundMessage};
use crate::render::render_for_channel;
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/metrics", get(metrics))
        .route("/v1/flows", get(flows))
        .route("/v1/sessions/:id", get(session))
        .route("/v1/inbound", post(inbound))
        .route(&state.config.server.ws_path, get(ws::chat_ws))
        .route(
            "/webhooks/whatsapp",
            get(webhooks::whatsapp_verify).post(webhooks::whatsapp),
        )
        .route("/webhooks/telegram", post(webhooks::telegram))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "sessions": state.sessions.len(),
        "runs": state.engine.runs().len(),
        "counters": state.metrics.snapshot(),
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn flows(State(state): State<AppState>) -> impl IntoResponse {
    let summaries: Vec<_> = state
        .engine
        .catalog()
        .list()
        .into_iter()
        .map(|flow| {
            json!({
                "id": flow.id,
                "version": flow.version,
                "name": flow.name,
                "module": flow.module.as_str(),
                "trigger": flow.trigger,
                "requires_auth": flow.requires_auth,
                "states": flow.states.len(),
            })
        })
        .collect();
    Json(json!({ "flows": summaries }))
}

async fn session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.get(&session_id) {
        Some(session) => Json(json!({
            "session_id": session.session_id,
            "platform": session.platform,
            "version": session.version,
            "data": session.data,
            "created_at": session.created_at,
            "last_active_at": session.last_active_at,
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown session" })))
            .into_response(),
    }
}

// ── POST /v1/inbound — normalized connector envelope ─────────────────

#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    pub session_id: String,
    pub identifier: String,
    pub channel: String,
    pub text: String,
}

async fn inbound(
    State(state): State<AppState>,
    Json(body): Json<InboundEnvelope>,
) -> impl IntoResponse {
    let channel = body.channel.clone();
    let msg = InboundMessage {
        session_id: body.session_id,
        identifier: body.identifier,
        channel: channel.clone(),
        text: body.text,
    };

    match orchestrator::handle_message(&state, msg).await {
        Some(reply) => {
            let rendered = render_for_channel(&reply, &channel);
            Json(json!({
                "accepted": true,
                "deduped": false,
                "reply": reply,
                "rendered": rendered,
            }))
            .into_response()
        }
        None => Json(json!({ "accepted": true, "deduped": true })).into_response(),
    }
}
