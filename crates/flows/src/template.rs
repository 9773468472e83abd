//! `{{path}}` template interpolation over JSON config trees.
//!
//! Flow authors write action configs with placeholders resolved against
//! the turn context. A string that is exactly one placeholder passes the
//! looked-up value through verbatim (objects and numbers survive); a
//! placeholder embedded in surrounding text stringifies. Missing paths
//! resolve to the empty string — interpolation never fails a turn.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder regex"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lookup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a dot-separated path against a context value. Numeric
/// segments index arrays. `?.` separators are accepted and behave like
/// `.` (missing links just yield `None`).
pub fn lookup<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = ctx;
    for segment in path.replace("?.", ".").split('.') {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Render a context value into a string for embedding inside text.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interpolation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Interpolate a single string leaf.
pub fn interpolate_str(input: &str, ctx: &Value) -> Value {
    let re = placeholder_re();

    // Whole-placeholder string: pass the raw value through so coordinate
    // objects and item arrays survive into executor configs.
    let trimmed = input.trim();
    if let Some(caps) = re.captures(trimmed) {
        if caps.get(0).map(|m| m.as_str()) == Some(trimmed) {
            let path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return match lookup(ctx, path) {
                Some(v) => v.clone(),
                None => {
                    tracing::debug!(path, "template path missing, resolved to empty");
                    Value::String(String::new())
                }
            };
        }
    }

    let rendered = re.replace_all(input, |caps: &regex::Captures<'_>| {
        let path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        match lookup(ctx, path) {
            Some(v) => stringify(v),
            None => {
                tracing::debug!(path, "template path missing, resolved to empty");
                String::new()
            }
        }
    });
    Value::String(rendered.into_owned())
}

/// Structural walk over a config node: every string leaf gets its
/// placeholders resolved; everything else is cloned as-is.
pub fn interpolate(node: &Value, ctx: &Value) -> Value {
    match node {
        Value::String(s) => interpolate_str(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// List the placeholder paths used anywhere in a config tree.
pub fn placeholder_paths(node: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_paths(node, &mut out);
    out
}

fn collect_paths(node: &Value, out: &mut Vec<String>) {
    match node {
        Value::String(s) => {
            for caps in placeholder_re().captures_iter(s) {
                if let Some(m) = caps.get(1) {
                    out.push(m.as_str().to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_paths(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_paths(v, out)),
        _ => {}
    }
}

/// Check that every `{{` in a string has a matching `}}` and encloses a
/// non-empty path. Used by the flow validator at registration time.
pub fn balanced_placeholders(s: &str) -> bool {
    let mut rest = s;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                if after[..close].trim().is_empty() || after[..close].contains("{{") {
                    return false;
                }
                rest = &after[close + 2..];
            }
            None => return false,
        }
    }
    // A stray closer without an opener is also malformed.
    !rest.contains("}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "session": { "user_id": 7, "phone": "9923383838" },
            "pickup": { "lat": 19.98, "lng": 73.78, "label": "College Road" },
            "search_results": { "items": [ { "name": "Misal" }, { "name": "Thali" } ] },
        })
    }

    #[test]
    fn embedded_placeholder_stringifies() {
        let out = interpolate_str("pickup at {{pickup.label}}!", &ctx());
        assert_eq!(out, json!("pickup at College Road!"));
    }

    #[test]
    fn whole_placeholder_passes_value_through() {
        let out = interpolate_str("{{pickup}}", &ctx());
        assert_eq!(out["lat"], json!(19.98));
    }

    #[test]
    fn numeric_segments_index_arrays() {
        let out = interpolate_str("{{search_results.items.1.name}}", &ctx());
        assert_eq!(out, json!("Thali"));
    }

    #[test]
    fn missing_path_resolves_to_empty_string() {
        let out = interpolate_str("hello {{no.such.path}}!", &ctx());
        assert_eq!(out, json!("hello !"));
        let whole = interpolate_str("{{no.such.path}}", &ctx());
        assert_eq!(whole, json!(""));
    }

    #[test]
    fn optional_chaining_is_accepted_in_paths() {
        let out = interpolate_str("{{pickup?.label}}", &ctx());
        assert_eq!(out, json!("College Road"));
    }

    #[test]
    fn structural_walk_covers_nested_configs() {
        let config = json!({
            "from": "{{pickup}}",
            "note": "user {{session.user_id}}",
            "sizes": ["{{session.user_id}}", 3],
        });
        let out = interpolate(&config, &ctx());
        assert_eq!(out["from"]["lng"], json!(73.78));
        assert_eq!(out["note"], json!("user 7"));
        assert_eq!(out["sizes"][0], json!(7));
        assert_eq!(out["sizes"][1], json!(3));
    }

    #[test]
    fn interpolation_is_idempotent_once_resolved() {
        let config = json!({ "msg": "hi {{session.phone}}" });
        let once = interpolate(&config, &ctx());
        let twice = interpolate(&once, &ctx());
        assert_eq!(once, twice);
    }

    #[test]
    fn never_panics_on_arbitrary_pairs() {
        // A small grid of hostile configs × contexts; the contract is
        // total — no panic, missing paths become "".
        let configs = [
            json!("{{"),
            json!("}}"),
            json!("{{}}"),
            json!("{{a..b}}"),
            json!({ "x": ["{{deep.0.1.2}}", { "y": "{{x}}{{y}}{{z}}" }] }),
            json!("{{_last_user_message}}"),
            json!(42),
            json!(null),
        ];
        let contexts = [
            json!(null),
            json!([]),
            json!({ "a": { "b": [1, 2] } }),
            json!("just a string"),
            ctx(),
        ];
        for config in &configs {
            for context in &contexts {
                let _ = interpolate(config, context);
            }
        }
    }

    #[test]
    fn balanced_check_flags_malformed_templates() {
        assert!(balanced_placeholders("plain"));
        assert!(balanced_placeholders("a {{x.y}} b {{z}}"));
        assert!(!balanced_placeholders("a {{x"));
        assert!(!balanced_placeholders("a }} b"));
        assert!(!balanced_placeholders("{{ }}"));
        assert!(!balanced_placeholders("{{a {{b}} }}"));
    }
}
