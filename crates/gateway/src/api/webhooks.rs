//! Channel webhooks: WhatsApp and Telegram intake.
//!
//! Stateless POSTs of channel-native payloads. The gateway verifies the
//! channel's signature scheme, extracts `(sender, text, attachment)`,
//! transcribes audio through the ASR client, normalizes location shares
//! into the session, and hands the orchestrator one normalized message.
//! The response body carries the channel-rendered reply for the
//! connector to deliver.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::orchestrator::{self, InboundMessage};
use crate::render::render_for_channel;
use crate::state::AppState;

/// Marker text handed to the orchestrator when the inbound message was
/// a location share rather than words.
const LOCATION_MARKER: &str = "[location shared]";

fn secret_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|s| !s.is_empty())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WhatsApp
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET verification handshake: echo `hub.challenge` when the verify
/// token matches.
pub async fn whatsapp_verify(
    State(state): State<AppState>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> impl IntoResponse {
    let expected = secret_from_env(&state.config.server.whatsapp_secret_env);
    let token_ok = match (&expected, params.get("hub.verify_token")) {
        (Some(secret), Some(token)) => {
            token.as_bytes().ct_eq(secret.as_bytes()).into()
        }
        (None, _) => true,
        _ => false,
    };
    if token_ok {
        params
            .get("hub.challenge")
            .cloned()
            .unwrap_or_default()
            .into_response()
    } else {
        StatusCode::FORBIDDEN.into_response()
    }
}

/// `X-Hub-Signature-256: sha256=<hex hmac of the raw body>`.
fn whatsapp_signature_ok(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let Some(provided) = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("sha256="))
        .and_then(|v| hex::decode(v).ok())
    else {
        return false;
    };

    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    computed.as_slice().ct_eq(&provided).into()
}

pub async fn whatsapp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = secret_from_env(&state.config.server.whatsapp_secret_env) {
        if !whatsapp_signature_ok(&secret, &headers, &body) {
            return (StatusCode::UNAUTHORIZED, "bad signature").into_response();
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return (StatusCode::BAD_REQUEST, "not json").into_response(),
    };

    let Some((sender, kind)) = extract_whatsapp_message(&payload) else {
        // Status callbacks and other non-message events are fine.
        return Json(json!({ "status": "ignored" })).into_response();
    };

    let session_id = format!("wa:{sender}");
    let reply = dispatch(&state, &session_id, &sender, "whatsapp", kind).await;
    match reply {
        Some(reply) => Json(json!({
            "status": "ok",
            "to": sender,
            "message": render_for_channel(&reply, "whatsapp"),
        }))
        .into_response(),
        None => Json(json!({ "status": "deduped" })).into_response(),
    }
}

/// What a channel message boils down to.
enum MessageKind {
    Text(String),
    Audio(String),
    Location { lat: f64, lng: f64 },
}

fn extract_whatsapp_message(payload: &Value) -> Option<(String, MessageKind)> {
    let message = payload
        .get("entry")?
        .get(0)?
        .get("changes")?
        .get(0)?
        .get("value")?
        .get("messages")?
        .get(0)?;
    let sender = message.get("from")?.as_str()?.to_string();

    if let Some(text) = message
        .get("text")
        .and_then(|t| t.get("body"))
        .and_then(Value::as_str)
    {
        return Some((sender, MessageKind::Text(text.to_string())));
    }
    if let Some(audio_id) = message
        .get("audio")
        .and_then(|a| a.get("id"))
        .and_then(Value::as_str)
    {
        return Some((sender, MessageKind::Audio(audio_id.to_string())));
    }
    if let Some(location) = message.get("location") {
        let lat = location.get("latitude")?.as_f64()?;
        let lng = location.get("longitude")?.as_f64()?;
        return Some((sender, MessageKind::Location { lat, lng }));
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Telegram
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn telegram(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    if let Some(secret) = secret_from_env(&state.config.server.telegram_secret_env) {
        let provided = headers
            .get("x-telegram-bot-api-secret-token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let ok: bool = provided.as_bytes().ct_eq(secret.as_bytes()).into();
        if !ok {
            return (StatusCode::UNAUTHORIZED, "bad secret token").into_response();
        }
    }

    let Some((sender, kind)) = extract_telegram_message(&payload) else {
        return Json(json!({ "status": "ignored" })).into_response();
    };

    let session_id = format!("tg:{sender}");
    let reply = dispatch(&state, &session_id, &sender, "telegram", kind).await;
    match reply {
        Some(reply) => {
            let mut message = render_for_channel(&reply, "telegram");
            message["chat_id"] = json!(sender);
            message["method"] = json!("sendMessage");
            Json(message).into_response()
        }
        None => Json(json!({ "status": "deduped" })).into_response(),
    }
}

fn extract_telegram_message(payload: &Value) -> Option<(String, MessageKind)> {
    let message = payload.get("message")?;
    let chat_id = message.get("chat")?.get("id")?;
    let sender = match chat_id {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };

    if let Some(text) = message.get("text").and_then(Value::as_str) {
        return Some((sender, MessageKind::Text(text.to_string())));
    }
    if let Some(file_id) = message
        .get("voice")
        .and_then(|v| v.get("file_id"))
        .and_then(Value::as_str)
    {
        return Some((sender, MessageKind::Audio(file_id.to_string())));
    }
    if let Some(location) = message.get("location") {
        let lat = location.get("latitude")?.as_f64()?;
        let lng = location.get("longitude")?.as_f64()?;
        return Some((sender, MessageKind::Location { lat, lng }));
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch(
    state: &AppState,
    session_id: &str,
    identifier: &str,
    channel: &str,
    kind: MessageKind,
) -> Option<pv_domain::reply::ReplyPayload> {
    let text = match kind {
        MessageKind::Text(text) => text,
        MessageKind::Audio(media_id) => match state.services.asr.transcribe(&media_id).await {
            Ok(transcript) => transcript,
            Err(e) => {
                tracing::warn!(error = %e, "audio transcription failed");
                return Some(pv_domain::reply::ReplyPayload::text(
                    "I couldn't make out that voice note — mind typing it?",
                ));
            }
        },
        MessageKind::Location { lat, lng } => {
            state
                .sessions
                .resolve_or_create(session_id, identifier, channel);
            state.sessions.update(session_id, |data| {
                data.location = Some(pv_sessions::store::StoredLocation {
                    lat,
                    lng,
                    zone_id: None,
                    updated_at: chrono::Utc::now(),
                });
            });
            LOCATION_MARKER.to_string()
        }
    };

    let msg = InboundMessage {
        session_id: session_id.to_string(),
        identifier: identifier.to_string(),
        channel: channel.to_string(),
        text,
    };
    orchestrator::handle_message(state, msg).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whatsapp_text_extraction() {
        let payload = json!({
            "entry": [{ "changes": [{ "value": { "messages": [{
                "from": "919923383838",
                "type": "text",
                "text": { "body": "send a parcel" },
            }] } }] }],
        });
        let (sender, kind) = extract_whatsapp_message(&payload).unwrap();
        assert_eq!(sender, "919923383838");
        assert!(matches!(kind, MessageKind::Text(t) if t == "send a parcel"));
    }

    #[test]
    fn whatsapp_location_extraction() {
        let payload = json!({
            "entry": [{ "changes": [{ "value": { "messages": [{
                "from": "919923383838",
                "location": { "latitude": 19.98, "longitude": 73.78 },
            }] } }] }],
        });
        let (_, kind) = extract_whatsapp_message(&payload).unwrap();
        assert!(matches!(kind, MessageKind::Location { lat, lng }
            if lat == 19.98 && lng == 73.78));
    }

    #[test]
    fn status_callbacks_are_ignored() {
        let payload = json!({
            "entry": [{ "changes": [{ "value": { "statuses": [{ "id": "x" }] } }] }],
        });
        assert!(extract_whatsapp_message(&payload).is_none());
    }

    #[test]
    fn telegram_voice_extraction() {
        let payload = json!({
            "message": {
                "chat": { "id": 12345 },
                "voice": { "file_id": "VF-1" },
            },
        });
        let (sender, kind) = extract_telegram_message(&payload).unwrap();
        assert_eq!(sender, "12345");
        assert!(matches!(kind, MessageKind::Audio(id) if id == "VF-1"));
    }

    #[test]
    fn whatsapp_signature_validates() {
        let secret = "top-secret";
        let body = br#"{"entry":[]}"#;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-hub-signature-256",
            format!("sha256={sig}").parse().unwrap(),
        );
        assert!(whatsapp_signature_ok(secret, &headers, body));

        headers.insert(
            "x-hub-signature-256",
            "sha256=deadbeef".parse().unwrap(),
        );
        assert!(!whatsapp_signature_ok(secret, &headers, body));
    }
}
