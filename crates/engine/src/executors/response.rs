//! Pure UI executor: emits an interpolated message with optional cards
//! and buttons. Never pauses by itself — the state type decides that.

use serde_json::Value;

use pv_domain::reply::{Button, ButtonKind, Card};
use pv_domain::ErrorKind;

use crate::executor::{ExecOutcome, Executor, TurnContext};

pub struct ResponseExecutor;

#[async_trait::async_trait]
impl Executor for ResponseExecutor {
    fn name(&self) -> &'static str {
        "response"
    }

    async fn execute(&self, config: &Value, _ctx: &TurnContext) -> ExecOutcome {
        let Some(message) = config.get("message").and_then(Value::as_str) else {
            return ExecOutcome::fail(ErrorKind::Internal, "response config needs 'message'");
        };

        let cards = config
            .get("cards")
            .map(coerce_cards)
            .unwrap_or_default();
        let buttons = config
            .get("buttons")
            .map(coerce_buttons)
            .unwrap_or_default();

        ExecOutcome::ok()
            .with_response(message)
            .with_cards(cards)
            .with_buttons(buttons)
    }
}

/// Coerce arbitrary item objects (search hits, place hits, hand-written
/// card configs) into [`Card`]s, leniently: `title` falls back to `name`,
/// `subtitle` to `address` or `store_name`, `action` to `maps_link`.
pub(crate) fn coerce_cards(value: &Value) -> Vec<Card> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let title = item
                .get("title")
                .or_else(|| item.get("name"))
                .and_then(Value::as_str)?
                .to_string();
            Some(Card {
                id: item
                    .get("id")
                    .map(value_to_id)
                    .unwrap_or_else(|| (i + 1).to_string()),
                title,
                subtitle: item
                    .get("subtitle")
                    .or_else(|| item.get("address"))
                    .or_else(|| item.get("store_name"))
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                image_url: item
                    .get("image_url")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                price: item.get("price").and_then(Value::as_f64),
                action: item
                    .get("action")
                    .or_else(|| item.get("maps_link"))
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            })
        })
        .collect()
}

fn value_to_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn coerce_buttons(value: &Value) -> Vec<Button> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let label = item.get("label").and_then(Value::as_str)?.to_string();
            let value_field = item
                .get("value")
                .and_then(Value::as_str)
                .unwrap_or(&label)
                .to_string();
            let kind = match item.get("type").and_then(Value::as_str) {
                Some("action") => ButtonKind::Action,
                Some("url") => ButtonKind::Url,
                _ => ButtonKind::QuickReply,
            };
            Some(Button {
                id: item
                    .get("id")
                    .map(value_to_id)
                    .unwrap_or_else(|| format!("b{}", i + 1)),
                label,
                value: value_field,
                kind,
            })
        })
        .collect()
}
