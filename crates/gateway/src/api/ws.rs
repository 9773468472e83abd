//! WebSocket chat endpoint.
//!
//! Frame shape: `{ "event": "...", "data": { ... } }` both ways. The
//! connection tracks which sessions it has seen and their phone
//! numbers; auth events published by other channels fan out here as
//! `auth:synced` / `auth:logged_out` frames.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use pv_domain::reply::{Button, Card};
use pv_sessions::auth::{normalize_phone, AuthEvent};

use crate::orchestrator::{self, InboundMessage};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum WsInbound {
    #[serde(rename = "message:send", rename_all = "camelCase")]
    MessageSend {
        session_id: String,
        text: String,
        #[serde(default)]
        meta: Option<serde_json::Value>,
    },
    #[serde(rename = "location:update", rename_all = "camelCase")]
    LocationUpdate {
        session_id: String,
        lat: f64,
        lng: f64,
        #[serde(default)]
        accuracy: Option<f64>,
    },
    #[serde(rename = "auth:login", rename_all = "camelCase")]
    AuthLogin {
        session_id: String,
        phone: String,
        token: String,
        user_id: i64,
        platform: String,
    },
    #[serde(rename = "auth:logout", rename_all = "camelCase")]
    AuthLogout { session_id: String, phone: String },
    #[serde(rename = "auth:check", rename_all = "camelCase")]
    AuthCheck { session_id: String, phone: String },
    #[serde(rename = "session:clear", rename_all = "camelCase")]
    SessionClear { session_id: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum WsOutbound {
    #[serde(rename = "message:receive", rename_all = "camelCase")]
    MessageReceive {
        session_id: String,
        text: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        cards: Vec<Card>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        buttons: Vec<Button>,
    },
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { session_id: String, is_typing: bool },
    #[serde(rename = "auth:synced", rename_all = "camelCase")]
    AuthSynced {
        user_id: i64,
        phone: String,
        token: String,
        platform: String,
        timestamp: String,
    },
    #[serde(rename = "auth:logged_out", rename_all = "camelCase")]
    AuthLoggedOut { phone: String, timestamp: String },
    #[serde(rename = "auth:status", rename_all = "camelCase")]
    AuthStatus {
        authenticated: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    #[serde(rename = "error", rename_all = "camelCase")]
    ErrorFrame { code: String, message: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut auth_rx = state.auth.subscribe();
    // session_id → normalized phone, for auth fan-out filtering.
    let mut watched: HashMap<String, String> = HashMap::new();

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(Ok(message)) = frame else { break };
                let Message::Text(raw) = message else { continue };
                let inbound: WsInbound = match serde_json::from_str(&raw) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = send(&mut sink, &WsOutbound::ErrorFrame {
                            code: "bad_frame".into(),
                            message: e.to_string(),
                        }).await;
                        continue;
                    }
                };
                if handle_frame(&state, &mut sink, &mut watched, inbound).await.is_err() {
                    break;
                }
            }
            event = auth_rx.recv() => {
                let Ok(event) = event else { continue };
                let relevant = watched.values().any(|phone| phone == event.phone());
                if !relevant {
                    continue;
                }
                let frame = match &event {
                    AuthEvent::Login { phone, user_id, token, channel } => WsOutbound::AuthSynced {
                        user_id: *user_id,
                        phone: phone.clone(),
                        token: token.clone(),
                        platform: channel.clone(),
                        timestamp: Utc::now().to_rfc3339(),
                    },
                    AuthEvent::Logout { phone, .. } => WsOutbound::AuthLoggedOut {
                        phone: phone.clone(),
                        timestamp: Utc::now().to_rfc3339(),
                    },
                };
                if send(&mut sink, &frame).await.is_err() {
                    break;
                }
            }
        }
    }
}

type Sink = futures_util::stream::SplitSink<WebSocket, Message>;

async fn send(sink: &mut Sink, frame: &WsOutbound) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).unwrap_or_default();
    sink.send(Message::Text(json)).await
}

async fn handle_frame(
    state: &AppState,
    sink: &mut Sink,
    watched: &mut HashMap<String, String>,
    frame: WsInbound,
) -> Result<(), axum::Error> {
    match frame {
        WsInbound::MessageSend {
            session_id, text, ..
        } => {
            send(
                sink,
                &WsOutbound::Typing {
                    session_id: session_id.clone(),
                    is_typing: true,
                },
            )
            .await?;

            let msg = InboundMessage {
                session_id: session_id.clone(),
                identifier: format!("web:{session_id}"),
                channel: "web".into(),
                text,
            };
            let reply = orchestrator::handle_message(state, msg).await;

            // Track the session's phone for auth fan-out.
            if let Some(session) = state.sessions.get(&session_id) {
                if let Some(phone) = session.data.phone {
                    watched.insert(session_id.clone(), phone);
                }
            }

            send(
                sink,
                &WsOutbound::Typing {
                    session_id: session_id.clone(),
                    is_typing: false,
                },
            )
            .await?;

            if let Some(reply) = reply {
                send(
                    sink,
                    &WsOutbound::MessageReceive {
                        session_id,
                        text: reply.text,
                        cards: reply.cards,
                        buttons: reply.buttons,
                    },
                )
                .await?;
            }
        }

        WsInbound::LocationUpdate {
            session_id,
            lat,
            lng,
            ..
        } => {
            state.sessions.resolve_or_create(&session_id, &format!("web:{session_id}"), "web");
            state.sessions.update(&session_id, |data| {
                data.location = Some(pv_sessions::store::StoredLocation {
                    lat,
                    lng,
                    zone_id: None,
                    updated_at: Utc::now(),
                });
            });
        }

        WsInbound::AuthLogin {
            session_id,
            phone,
            token,
            user_id,
            platform,
        } => {
            let normalized = normalize_phone(&phone);
            state.sessions.resolve_or_create(&session_id, &format!("web:{session_id}"), "web");
            state.sessions.update(&session_id, |data| {
                data.authenticated = true;
                data.user_id = Some(user_id);
                data.auth_token = Some(token.clone());
                data.phone = Some(normalized.clone());
            });
            state
                .auth
                .authenticate_user(&normalized, &token, user_id, "", &platform);
            watched.insert(session_id, normalized);
            send(
                sink,
                &WsOutbound::AuthStatus {
                    authenticated: true,
                    user_id: Some(user_id),
                    user_name: None,
                },
            )
            .await?;
        }

        WsInbound::AuthLogout { session_id, phone } => {
            state.auth.logout_user(&phone, Some("web"));
            state.sessions.update(&session_id, |data| {
                data.authenticated = false;
                data.user_id = None;
                data.auth_token = None;
            });
            send(
                sink,
                &WsOutbound::AuthStatus {
                    authenticated: false,
                    user_id: None,
                    user_name: None,
                },
            )
            .await?;
        }

        WsInbound::AuthCheck { session_id, phone } => {
            let record = state.auth.get_by_phone(&phone);
            watched.insert(session_id, normalize_phone(&phone));
            let frame = match record {
                Some(record) => WsOutbound::AuthStatus {
                    authenticated: true,
                    user_id: Some(record.user_id),
                    user_name: Some(record.first_name),
                },
                None => WsOutbound::AuthStatus {
                    authenticated: false,
                    user_id: None,
                    user_name: None,
                },
            };
            send(sink, &frame).await?;
        }

        WsInbound::SessionClear { session_id } => {
            state.engine.cancel_active(&session_id);
            state.sessions.clear(&session_id);
            watched.remove(&session_id);
            send(
                sink,
                &WsOutbound::MessageReceive {
                    session_id,
                    text: "Session cleared.".into(),
                    cards: vec![],
                    buttons: vec![],
                },
            )
            .await?;
        }
    }
    Ok(())
}
