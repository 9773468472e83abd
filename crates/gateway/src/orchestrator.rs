//! Top-level per-message controller.
//!
//! Every inbound message — WebSocket, webhook, or the normalized
//! `/v1/inbound` envelope — funnels through [`handle_message`]:
//! dedup → per-session lock → system commands → cross-channel auth
//! preheat → resume the active run → intent classification → trigger
//! match (with auth interception) → keyword fallback → clarification.
//! Exactly one reply payload leaves per processed message.

use serde_json::{json, Value};

use pv_domain::reply::ReplyPayload;
use pv_domain::trace::TraceEvent;
use pv_engine::{RunStatus, TurnOutcome};
use pv_flows::builtin::AUTH_FLOW_ID;
use pv_sessions::auth::normalize_phone;

use crate::metrics::Metrics;
use crate::state::AppState;

const BUSY_REPLY: &str = "One moment — I'm still working on your previous message.";
const RESET_ACK: &str = "Okay, I've cleared that. What would you like to do next?";
const CLARIFY_FALLBACK: &str =
    "I didn't catch that — do you want to order food, send a parcel, or track an order?";

/// One normalized inbound message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub session_id: String,
    /// Phone number or channel-scoped sender id.
    pub identifier: String,
    pub channel: String,
    pub text: String,
}

/// Process one inbound message. `None` means the message was dropped as
/// a duplicate and nothing should be emitted.
pub async fn handle_message(state: &AppState, msg: InboundMessage) -> Option<ReplyPayload> {
    // ── 1. Dedup ──────────────────────────────────────────────────────
    if state.dedupe.should_drop(&msg.session_id, &msg.text) {
        Metrics::incr(&state.metrics.dedup_drops);
        TraceEvent::DedupDrop {
            session_id: msg.session_id.clone(),
        }
        .emit();
        return None;
    }

    // ── 2. One in-flight turn per session ─────────────────────────────
    let wait = std::time::Duration::from_millis(state.config.engine.per_session_lock_wait_ms);
    let _permit = match state.session_locks.acquire(&msg.session_id, wait).await {
        Ok(permit) => permit,
        Err(_) => {
            Metrics::incr(&state.metrics.lock_timeouts);
            return Some(ReplyPayload::text(BUSY_REPLY));
        }
    };

    Metrics::incr(&state.metrics.turns_processed);
    Some(handle_locked(state, msg).await)
}

async fn handle_locked(state: &AppState, msg: InboundMessage) -> ReplyPayload {
    // ── 3. Session ────────────────────────────────────────────────────
    let (session, _is_new) =
        state
            .sessions
            .resolve_or_create(&msg.session_id, &msg.identifier, &msg.channel);
    state.sessions.touch(&msg.session_id);

    // Notices queued by cross-channel auth sync ride on this turn.
    let notices = drain_notices(state, &msg.session_id);

    // ── 4. System commands ────────────────────────────────────────────
    let trimmed = msg.text.trim();
    if trimmed.eq_ignore_ascii_case("/reset") || trimmed.eq_ignore_ascii_case("/clear") {
        if state.engine.cancel_active(&msg.session_id) {
            Metrics::incr(&state.metrics.flow_cancellations);
        }
        state.sessions.clear_scratch(&msg.session_id);
        return with_notices(notices, ReplyPayload::text(RESET_ACK));
    }

    // ── 5. Cross-channel auth preheat ─────────────────────────────────
    if let Some(phone) = session.data.phone.clone() {
        if let Some(record) = state.auth.get_by_phone(&phone) {
            if session.data.auth_token.as_deref() != Some(record.token.as_str()) {
                state.sessions.update(&msg.session_id, |data| {
                    data.authenticated = true;
                    data.user_id = Some(record.user_id);
                    data.auth_token = Some(record.token.clone());
                    data.first_name = Some(record.first_name.clone());
                });
            }
        }
    }

    // ── 6. Resume the active run ──────────────────────────────────────
    match state.engine.resume_flow(&msg.session_id, &msg.text).await {
        Ok(Some(outcome)) => {
            let reply = after_turn(state, &msg, outcome).await;
            return with_notices(notices, reply);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, session_id = %msg.session_id, "resume failed");
            return with_notices(
                notices,
                ReplyPayload::text("Sorry — something went wrong. Please try again."),
            );
        }
    }

    // ── 7. Intent classification ──────────────────────────────────────
    let nlu = match state.services.nlu.classify(&msg.text).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(error = %e, "nlu classify failed, keyword fallback only");
            pv_services::NluResult {
                intent: "unknown".into(),
                confidence: 0.0,
                entities: json!({}),
            }
        }
    };
    TraceEvent::IntentClassified {
        session_id: msg.session_id.clone(),
        intent: nlu.intent.clone(),
        confidence: nlu.confidence,
    }
    .emit();

    // ── 8. Trigger match ──────────────────────────────────────────────
    let threshold = state.config.router.trigger_threshold;
    let mut intent = (nlu.confidence >= threshold).then(|| nlu.intent.clone());

    // ── 9. Keyword fallback for well-known words ──────────────────────
    if intent.is_none() {
        let lower = msg.text.to_lowercase();
        intent = state
            .config
            .router
            .keywords
            .iter()
            .find(|(keyword, _)| lower.contains(keyword.as_str()))
            .map(|(_, trigger)| trigger.clone());
    }

    if let Some(intent) = intent {
        if let Some(flow) = state.engine.catalog().by_trigger(&intent) {
            let session = state.sessions.get(&msg.session_id);
            let authenticated = session.map(|s| s.data.authenticated).unwrap_or(false);

            // Auth interception: stash the intent, run the login flow.
            if flow.requires_auth && !authenticated {
                state.sessions.update(&msg.session_id, |data| {
                    data.pending_intent = Some(intent.clone());
                    data.pending_intent_text = Some(msg.text.clone());
                });
                let reply = start_flow(state, &msg, AUTH_FLOW_ID, &msg.text, &nlu.entities).await;
                return with_notices(notices, reply);
            }

            let reply = start_flow(state, &msg, &flow.id, &msg.text, &nlu.entities).await;
            return with_notices(notices, reply);
        }
    }

    // ── 10. Clarification ─────────────────────────────────────────────
    with_notices(notices, clarify(state, &msg.text).await)
}

/// Start a flow and post-process its first turn.
async fn start_flow(
    state: &AppState,
    msg: &InboundMessage,
    flow_id: &str,
    text: &str,
    entities: &Value,
) -> ReplyPayload {
    let initial_context = json!({
        "_last_user_message": text,
        "nlu": { "entities": entities },
    });
    Metrics::incr(&state.metrics.flow_starts);
    match state
        .engine
        .start_flow(flow_id, &msg.session_id, initial_context)
        .await
    {
        Ok(outcome) => after_turn(state, msg, outcome).await,
        Err(e) => {
            tracing::error!(error = %e, flow_id, "flow start failed");
            ReplyPayload::text("Sorry — something went wrong. Please try again.")
        }
    }
}

/// Record metrics for a finished turn and run the auth-completion hook.
async fn after_turn(state: &AppState, msg: &InboundMessage, outcome: TurnOutcome) -> ReplyPayload {
    if outcome.validation_reprompt {
        Metrics::incr(&state.metrics.validation_reprompts);
    }
    match outcome.status {
        RunStatus::Completed => Metrics::incr(&state.metrics.flow_completions),
        RunStatus::Failed => {
            let detail = state
                .engine
                .runs()
                .get(&outcome.run_id)
                .and_then(|r| r.error)
                .unwrap_or_default();
            state.metrics.record_failure(&detail);
        }
        RunStatus::Cancelled => Metrics::incr(&state.metrics.flow_cancellations),
        _ => {}
    }

    if outcome.flow_id == AUTH_FLOW_ID && outcome.status == RunStatus::Completed {
        return Box::pin(commit_auth_and_resume(state, msg, outcome)).await;
    }
    outcome.reply
}

/// The auth flow finished: commit the verified identity to the session
/// and the central store, then start whatever flow the user originally
/// asked for.
async fn commit_auth_and_resume(
    state: &AppState,
    msg: &InboundMessage,
    outcome: TurnOutcome,
) -> ReplyPayload {
    let auth = &outcome.run_context["auth"];
    let user_id = auth["user_id"].as_i64();
    let token = auth["token"].as_str();
    let phone = auth["phone"]
        .as_str()
        .map(normalize_phone)
        .filter(|p| !p.is_empty());
    let first_name = auth["first_name"].as_str().unwrap_or("").to_string();

    let (Some(user_id), Some(token), Some(phone)) = (user_id, token, phone) else {
        tracing::warn!(run_id = %outcome.run_id, "auth flow completed without credentials");
        return outcome.reply;
    };

    state.sessions.update(&msg.session_id, |data| {
        data.authenticated = true;
        data.user_id = Some(user_id);
        data.auth_token = Some(token.to_string());
        data.phone = Some(phone.clone());
        data.first_name = Some(first_name.clone());
    });
    state
        .auth
        .authenticate_user(&phone, token, user_id, &first_name, &msg.channel);

    // Pop the stashed intent and start its flow in the same turn, with
    // the utterance that originally carried it.
    let session = state.sessions.get(&msg.session_id);
    let pending = session.as_ref().and_then(|s| s.data.pending_intent.clone());
    let Some(intent) = pending else {
        return outcome.reply;
    };
    let original_text = session
        .and_then(|s| s.data.pending_intent_text)
        .unwrap_or_else(|| msg.text.clone());
    state.sessions.update(&msg.session_id, |data| {
        data.pending_intent = None;
        data.pending_intent_text = None;
    });

    let Some(flow) = state.engine.catalog().by_trigger(&intent) else {
        return outcome.reply;
    };
    let mut reply = outcome.reply;
    let followup = start_flow(state, msg, &flow.id, &original_text, &json!({})).await;
    reply.push_text(&followup.text);
    reply.cards.extend(followup.cards);
    reply.buttons.extend(followup.buttons);
    reply
}

/// LLM-generated clarification with a bounded option list; canned text
/// when no provider answers.
async fn clarify(state: &AppState, text: &str) -> ReplyPayload {
    let options = state.engine.catalog().triggers();
    let request = pv_services::LlmRequest {
        system_prompt: format!(
            "You are a friendly assistant for a local commerce service. The user's \
             message didn't match anything. In one short sentence, ask which of these \
             they want: {}. Do not invent other capabilities.",
            options.join(", ")
        ),
        user_prompt: text.to_string(),
        max_tokens: Some(80),
        temperature: Some(0.4),
        json_schema: None,
    };
    match state.services.llm.chat(request).await {
        Ok(response) => ReplyPayload::text(response.content),
        Err(e) => {
            tracing::debug!(error = %e, "clarification LLM unavailable, using canned prompt");
            ReplyPayload::text(CLARIFY_FALLBACK)
        }
    }
}

fn drain_notices(state: &AppState, session_id: &str) -> Vec<String> {
    let mut notices = Vec::new();
    state.sessions.update(session_id, |data| {
        notices = std::mem::take(&mut data.pending_notices);
    });
    notices
}

fn with_notices(notices: Vec<String>, reply: ReplyPayload) -> ReplyPayload {
    if notices.is_empty() {
        return reply;
    }
    let mut combined = ReplyPayload::default();
    for notice in notices {
        combined.push_text(&notice);
    }
    combined.push_text(&reply.text);
    combined.cards = reply.cards;
    combined.buttons = reply.buttons;
    combined
}
