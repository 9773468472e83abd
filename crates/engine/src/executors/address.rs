//! Multi-turn address collection.
//!
//! Accepts, in priority order: coordinates embedded in the message text
//! ("pickup at 19.98,73.78"), a location the user just shared on the
//! channel (fresh `session.location` when `allow_share`), or the saved
//! session location (`allow_saved`). Anything else re-prompts and
//! pauses; the engine re-runs this action on the next message.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::executor::{ExecOutcome, Executor, TurnContext};

/// A share is "fresh" when it arrived within this many seconds.
const SHARE_FRESH_SECS: i64 = 120;

fn coords_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(-?\d{1,3}\.\d+)\s*,\s*(-?\d{1,3}\.\d+)").expect("coords regex")
    })
}

pub struct AddressExecutor;

impl AddressExecutor {
    fn from_text(text: &str) -> Option<(f64, f64)> {
        let caps = coords_re().captures(text)?;
        let lat: f64 = caps.get(1)?.as_str().parse().ok()?;
        let lng: f64 = caps.get(2)?.as_str().parse().ok()?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return None;
        }
        Some((lat, lng))
    }

    fn session_location(ctx: &TurnContext) -> Option<(f64, f64, i64)> {
        let location = ctx.context.get("session")?.get("location")?;
        let lat = location.get("lat")?.as_f64()?;
        let lng = location.get("lng")?.as_f64()?;
        let age_secs = location
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| (chrono::Utc::now() - t.with_timezone(&chrono::Utc)).num_seconds())
            .unwrap_or(i64::MAX);
        Some((lat, lng, age_secs))
    }
}

#[async_trait::async_trait]
impl Executor for AddressExecutor {
    fn name(&self) -> &'static str {
        "address"
    }

    fn awaits_input(&self) -> bool {
        true
    }

    async fn execute(&self, config: &Value, ctx: &TurnContext) -> ExecOutcome {
        let field = config
            .get("field")
            .and_then(Value::as_str)
            .unwrap_or("address");
        let allow_saved = config
            .get("allow_saved")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let allow_share = config
            .get("allow_share")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let raw = ctx
            .context
            .get("_last_user_message")
            .and_then(Value::as_str)
            .unwrap_or_default();

        // 1. Coordinates in the text itself.
        if let Some((lat, lng)) = Self::from_text(raw) {
            return ExecOutcome::ok()
                .with_output(json!({
                    "label": raw.trim(),
                    "lat": lat,
                    "lng": lng,
                    "raw": raw,
                }))
                .with_event("address_valid");
        }

        // 2. A location the user shared on the channel just now.
        if let Some((lat, lng, age_secs)) = Self::session_location(ctx) {
            let fresh = age_secs <= SHARE_FRESH_SECS;
            if (allow_share && fresh) || allow_saved {
                let label = if fresh {
                    "your shared location"
                } else {
                    "your saved location"
                };
                return ExecOutcome::ok()
                    .with_output(json!({
                        "label": label,
                        "lat": lat,
                        "lng": lng,
                        "raw": raw,
                    }))
                    .with_event("address_valid");
            }
        }

        // 3. Re-prompt and wait for another message.
        ExecOutcome::ok()
            .with_response(format!(
                "I couldn't read that {field} address — share a location pin, or send \
                 it like '19.98, 73.76'."
            ))
            .with_event("invalid")
            .paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_util::turn_ctx;

    fn config() -> Value {
        json!({ "field": "pickup", "allow_saved": false, "allow_share": true })
    }

    #[tokio::test]
    async fn coordinates_in_text_are_valid() {
        let ctx = turn_ctx(json!({ "_last_user_message": "pickup at 19.98,73.78" }));
        let outcome = AddressExecutor.execute(&config(), &ctx).await;
        assert_eq!(outcome.events, vec!["address_valid"]);
        let output = outcome.output.unwrap();
        assert_eq!(output["lat"], json!(19.98));
        assert_eq!(output["lng"], json!(73.78));
        assert!(!outcome.pause);
    }

    #[tokio::test]
    async fn out_of_range_coordinates_are_rejected() {
        let ctx = turn_ctx(json!({ "_last_user_message": "991.0, 73.5" }));
        let outcome = AddressExecutor.execute(&config(), &ctx).await;
        assert_eq!(outcome.events, vec!["invalid"]);
        assert!(outcome.pause);
    }

    #[tokio::test]
    async fn fresh_shared_location_is_used() {
        let ctx = turn_ctx(json!({
            "_last_user_message": "here",
            "session": {
                "location": {
                    "lat": 19.96,
                    "lng": 73.76,
                    "updated_at": chrono::Utc::now().to_rfc3339(),
                },
            },
        }));
        let outcome = AddressExecutor.execute(&config(), &ctx).await;
        assert_eq!(outcome.events, vec!["address_valid"]);
        assert_eq!(outcome.output.unwrap()["label"], json!("your shared location"));
    }

    #[tokio::test]
    async fn stale_share_needs_allow_saved() {
        let stale = (chrono::Utc::now() - chrono::Duration::hours(3)).to_rfc3339();
        let session = json!({
            "_last_user_message": "use my place",
            "session": { "location": { "lat": 19.96, "lng": 73.76, "updated_at": stale } },
        });

        let strict = AddressExecutor.execute(&config(), &turn_ctx(session.clone())).await;
        assert_eq!(strict.events, vec!["invalid"]);

        let relaxed = AddressExecutor
            .execute(
                &json!({ "field": "pickup", "allow_saved": true }),
                &turn_ctx(session),
            )
            .await;
        assert_eq!(relaxed.events, vec!["address_valid"]);
        assert_eq!(
            relaxed.output.unwrap()["label"],
            json!("your saved location")
        );
    }

    #[tokio::test]
    async fn unreadable_text_reprompts_and_pauses() {
        let ctx = turn_ctx(json!({ "_last_user_message": "ummm somewhere" }));
        let outcome = AddressExecutor.execute(&config(), &ctx).await;
        assert!(outcome.pause);
        assert!(outcome.response.unwrap().contains("pickup"));
    }
}
