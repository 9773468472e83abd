//! Turn context assembly and output merging.
//!
//! The context is one JSON object visible to template interpolation and
//! expression evaluation. Reserved top-level namespaces:
//!
//! - `system.*` — set by the engine each turn (session id, phone, now,
//!   trace id). Executors never write here.
//! - `session.*` — snapshot of session data taken at turn start.
//! - `_last_user_message` / `_last_event` — the inbound text and the
//!   event that caused the current transition.
//!
//! Everything else is executor output stored under each action's
//! declared `output` key.

use serde_json::{Map, Value};

pub const SYSTEM_NS: &str = "system";
pub const SESSION_NS: &str = "session";
pub const LAST_USER_MESSAGE: &str = "_last_user_message";
pub const LAST_EVENT: &str = "_last_event";

/// Engine-owned values refreshed at every turn.
#[derive(Debug, Clone)]
pub struct SystemContext {
    pub session_id: String,
    pub phone: Option<String>,
    pub now: chrono::DateTime<chrono::Utc>,
    pub trace_id: String,
}

impl SystemContext {
    fn to_value(&self) -> Value {
        serde_json::json!({
            "session_id": self.session_id,
            "phone": self.phone,
            "now": self.now.to_rfc3339(),
            "trace_id": self.trace_id,
        })
    }
}

/// Build the per-turn context: the run's persisted context overlaid with
/// a fresh `system.*` block and the session snapshot.
pub fn build_turn_context(
    run_context: Value,
    session_snapshot: Value,
    system: &SystemContext,
) -> Value {
    let mut root = match run_context {
        Value::Object(map) => map,
        // A damaged persisted context is replaced rather than crashing
        // the turn.
        _ => Map::new(),
    };
    root.insert(SYSTEM_NS.into(), system.to_value());
    root.insert(SESSION_NS.into(), session_snapshot);
    Value::Object(root)
}

/// True for keys executors may not write through `merge`.
pub fn is_reserved(key: &str) -> bool {
    let head = key.split('.').next().unwrap_or(key);
    head == SYSTEM_NS || head == SESSION_NS
}

/// Place `value` under `output_key`. Dotted keys create nested objects.
/// Replacing a non-object with an object is allowed; the reverse is
/// rejected with a warning and leaves the context untouched.
pub fn merge(ctx: &mut Value, output_key: &str, value: Value) {
    if is_reserved(output_key) {
        tracing::warn!(key = output_key, "executor output may not write a reserved namespace");
        return;
    }
    let root = match ctx {
        Value::Object(map) => map,
        _ => {
            tracing::warn!("context root is not an object; dropping output");
            return;
        }
    };

    let segments: Vec<&str> = output_key.split('.').collect();
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            tracing::warn!(key = output_key, "empty segment in output key");
            return;
        }
        let last = i == segments.len() - 1;
        if last {
            if let Some(existing) = current.get(*segment) {
                if existing.is_object() && !value.is_object() && !value.is_null() {
                    tracing::warn!(
                        key = output_key,
                        "refusing to replace an object with a scalar"
                    );
                    return;
                }
            }
            current.insert((*segment).to_string(), value);
            return;
        }
        // Intermediate segment: descend, creating objects as needed. A
        // scalar in the way is replaced (object-over-scalar is the
        // allowed direction).
        let entry = {
            let map = current;
            map.entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()))
        };
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().expect("just ensured object");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn system() -> SystemContext {
        SystemContext {
            session_id: "s1".into(),
            phone: Some("9923383838".into()),
            now: chrono::Utc::now(),
            trace_id: "t1".into(),
        }
    }

    #[test]
    fn build_overlays_system_and_session() {
        let ctx = build_turn_context(
            json!({ "pickup": { "lat": 1.0 } }),
            json!({ "user_id": 7 }),
            &system(),
        );
        assert_eq!(ctx["pickup"]["lat"], json!(1.0));
        assert_eq!(ctx["session"]["user_id"], json!(7));
        assert_eq!(ctx["system"]["session_id"], json!("s1"));
    }

    #[test]
    fn damaged_run_context_is_replaced() {
        let ctx = build_turn_context(json!("corrupt"), json!({}), &system());
        assert!(ctx.is_object());
    }

    #[test]
    fn merge_creates_nested_objects_from_dotted_keys() {
        let mut ctx = json!({});
        merge(&mut ctx, "order.result.id", json!("P-1001"));
        assert_eq!(ctx["order"]["result"]["id"], json!("P-1001"));
    }

    #[test]
    fn merge_rejects_reserved_namespaces() {
        let mut ctx = json!({ "system": { "session_id": "s1" } });
        merge(&mut ctx, "system.session_id", json!("evil"));
        merge(&mut ctx, "session.user_id", json!(666));
        assert_eq!(ctx["system"]["session_id"], json!("s1"));
        assert!(ctx["session"].get("user_id").is_none() || ctx["session"].is_null());
    }

    #[test]
    fn object_may_replace_scalar_but_not_the_reverse() {
        let mut ctx = json!({ "slot": 1 });
        merge(&mut ctx, "slot", json!({ "a": 1 }));
        assert_eq!(ctx["slot"]["a"], json!(1));

        merge(&mut ctx, "slot", json!(2));
        assert_eq!(ctx["slot"]["a"], json!(1), "scalar-over-object must be rejected");
    }

    #[test]
    fn merge_through_a_scalar_upgrades_it() {
        let mut ctx = json!({ "a": 5 });
        merge(&mut ctx, "a.b", json!("x"));
        assert_eq!(ctx["a"]["b"], json!("x"));
    }
}
