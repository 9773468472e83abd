//! Per-channel rendering of the reply payload.
//!
//! A pure function of (payload, channel) — no business logic. Rich
//! channels get native interactive shapes; plain-text channels get
//! cards serialized as a numbered list and buttons as a hint line.

use serde_json::{json, Value};

use pv_domain::reply::{ButtonKind, ReplyPayload};

/// Render a reply for a channel. The result is the channel-native JSON
/// body a connector can forward as-is.
pub fn render_for_channel(payload: &ReplyPayload, channel: &str) -> Value {
    match channel {
        "web" => render_web(payload),
        "whatsapp" => render_whatsapp(payload),
        "telegram" => render_telegram(payload),
        _ => json!({ "text": render_plain(payload) }),
    }
}

fn render_web(payload: &ReplyPayload) -> Value {
    json!({
        "text": payload.text,
        "cards": payload.cards,
        "buttons": payload.buttons,
    })
}

fn render_whatsapp(payload: &ReplyPayload) -> Value {
    // Buttons become an interactive list when present; cards always
    // flatten into the body (WhatsApp has no card gallery).
    let body = render_plain_cards(payload);
    if payload.buttons.is_empty() {
        return json!({ "type": "text", "text": { "body": body } });
    }
    let rows: Vec<Value> = payload
        .buttons
        .iter()
        .map(|b| json!({ "id": b.value, "title": truncate(&b.label, 24) }))
        .collect();
    json!({
        "type": "interactive",
        "interactive": {
            "type": "list",
            "body": { "text": body },
            "action": {
                "button": "Choose",
                "sections": [{ "rows": rows }],
            },
        },
    })
}

fn render_telegram(payload: &ReplyPayload) -> Value {
    let keyboard: Vec<Vec<Value>> = payload
        .buttons
        .iter()
        .map(|b| {
            vec![match b.kind {
                ButtonKind::Url => json!({ "text": b.label, "url": b.value }),
                _ => json!({ "text": b.label, "callback_data": b.value }),
            }]
        })
        .collect();

    let mut message = json!({ "text": render_plain_cards(payload) });
    if !keyboard.is_empty() {
        message["reply_markup"] = json!({ "inline_keyboard": keyboard });
    }
    message
}

/// Text plus cards as a numbered list.
fn render_plain_cards(payload: &ReplyPayload) -> String {
    let mut body = payload.text.clone();
    for (i, card) in payload.cards.iter().enumerate() {
        body.push('\n');
        body.push_str(&format!("{}. {}", i + 1, card.title));
        if let Some(price) = card.price {
            body.push_str(&format!(" — ₹{price}"));
        }
        if let Some(subtitle) = &card.subtitle {
            body.push_str(&format!(" ({subtitle})"));
        }
    }
    body
}

/// Fully lossy: cards numbered, buttons as a reply hint.
fn render_plain(payload: &ReplyPayload) -> String {
    let mut body = render_plain_cards(payload);
    if !payload.buttons.is_empty() {
        let labels: Vec<&str> = payload.buttons.iter().map(|b| b.label.as_str()).collect();
        body.push_str(&format!("\n[{}]", labels.join(" / ")));
    }
    body
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max.saturating_sub(1)).collect::<String>() + "…"
    }
}
