//! Registration-time flow validation.
//!
//! Flows fail fast at startup, never at runtime. Hard failures return
//! `Error::Flow`; iteration-friendly issues (unreachable states, unknown
//! session paths) come back as warnings.

use std::collections::{BTreeSet, HashSet, VecDeque};

use pv_domain::{Error, Result};

use crate::expr::parse_expression;
use crate::model::{FlowDefinition, StateKind};
use crate::template::{balanced_placeholders, placeholder_paths};

/// Session fields the soft template check recognizes.
const SESSION_FIELDS: &[&str] = &[
    "user_id",
    "authenticated",
    "auth_token",
    "phone",
    "first_name",
    "location",
    "cart",
    "module_name",
    "active_run_id",
    "pending_intent",
];

const SYSTEM_FIELDS: &[&str] = &["session_id", "phone", "now", "trace_id"];

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

/// Validate one flow against the set of registered executor names.
pub fn validate_flow(
    flow: &FlowDefinition,
    executors: &HashSet<String>,
) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let fail = |msg: String| Error::Flow(format!("{}: {msg}", flow.id));

    // ── Rule 1: state membership ─────────────────────────────────────
    if flow.final_states.is_empty() {
        return Err(fail("final_states must not be empty".into()));
    }
    if !flow.states.contains_key(&flow.initial_state) {
        return Err(fail(format!(
            "initial_state '{}' is not a declared state",
            flow.initial_state
        )));
    }
    for final_state in &flow.final_states {
        if !flow.states.contains_key(final_state) {
            return Err(fail(format!(
                "final state '{final_state}' is not a declared state"
            )));
        }
    }

    // ── Rule 2: referential integrity ────────────────────────────────
    for (name, state) in &flow.states {
        for (event, target) in &state.transitions {
            if !flow.states.contains_key(target) {
                return Err(fail(format!(
                    "state '{name}' transition '{event}' targets unknown state '{target}'"
                )));
            }
        }
        if let Some(on_error) = &state.on_error {
            if let Some(fallback) = &on_error.fallback_state {
                if !flow.states.contains_key(fallback) {
                    return Err(fail(format!(
                        "state '{name}' on_error fallback targets unknown state '{fallback}'"
                    )));
                }
            }
        }
        for action in &state.actions {
            if !executors.contains(&action.executor) {
                return Err(fail(format!(
                    "state '{name}' references unregistered executor '{}'",
                    action.executor
                )));
            }
        }

        // Decision states: expressions must be inside the grammar, and
        // every condition event should lead somewhere.
        if state.kind == StateKind::Decision {
            if !state.actions.is_empty() {
                return Err(fail(format!(
                    "decision state '{name}' must not carry actions"
                )));
            }
            if state.conditions.is_empty() {
                return Err(fail(format!(
                    "decision state '{name}' has no conditions"
                )));
            }
            for condition in &state.conditions {
                if let Err(reason) = parse_expression(&condition.expression) {
                    return Err(fail(format!(
                        "decision state '{name}' expression '{}' rejected: {reason}",
                        condition.expression
                    )));
                }
                if !state.transitions.contains_key(&condition.event) {
                    report.warnings.push(format!(
                        "{}: decision state '{name}' event '{}' has no transition",
                        flow.id, condition.event
                    ));
                }
            }
        }

        // An `end`-typed state outside final_states would strand a run.
        if state.kind == StateKind::End && !flow.is_final(name) {
            return Err(fail(format!(
                "end state '{name}' is not listed in final_states"
            )));
        }

        // A state with no actions and no way out is only legal as a final
        // state.
        if state.actions.is_empty()
            && state.transitions.is_empty()
            && state.conditions.is_empty()
            && !flow.is_final(name)
        {
            return Err(fail(format!(
                "state '{name}' has no actions and no transitions but is not final"
            )));
        }

        // ── Rule 5: template sanity ──────────────────────────────────
        for action in &state.actions {
            check_templates(flow, name, &action.config, &mut report)?;
        }
    }

    // ── Rules 3, 4, 8: reachability ──────────────────────────────────
    let reachable = reachable_states(flow);
    for (name, state) in &flow.states {
        if !reachable.contains(name.as_str()) {
            if flow.is_final(name) {
                return Err(fail(format!(
                    "final state '{name}' is unreachable from '{}'",
                    flow.initial_state
                )));
            }
            report.warnings.push(format!(
                "{}: state '{name}' is unreachable from '{}'",
                flow.id, flow.initial_state
            ));
            continue;
        }
        // Reachable dead end: nothing out, not final.
        if state.transitions.is_empty() && state.conditions.is_empty() && !flow.is_final(name) {
            return Err(fail(format!(
                "reachable state '{name}' is a dead end and not final"
            )));
        }
    }

    Ok(report)
}

fn check_templates(
    flow: &FlowDefinition,
    state: &str,
    config: &serde_json::Value,
    report: &mut ValidationReport,
) -> Result<()> {
    let mut check_str = |s: &str| -> Result<()> {
        if !balanced_placeholders(s) {
            return Err(Error::Flow(format!(
                "{}: state '{state}' has a malformed template: {s:?}",
                flow.id
            )));
        }
        Ok(())
    };
    walk_strings(config, &mut check_str)?;

    for path in placeholder_paths(config) {
        let normalized = path.replace("?.", ".");
        let parts: Vec<&str> = normalized.split('.').collect();
        match parts.as_slice() {
            ["session", field, ..] if !SESSION_FIELDS.contains(field) => {
                report.warnings.push(format!(
                    "{}: state '{state}' references unknown session field '{{{{{path}}}}}'",
                    flow.id
                ));
            }
            ["system", field, ..] if !SYSTEM_FIELDS.contains(field) => {
                report.warnings.push(format!(
                    "{}: state '{state}' references unknown system field '{{{{{path}}}}}'",
                    flow.id
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn walk_strings(
    node: &serde_json::Value,
    check: &mut impl FnMut(&str) -> Result<()>,
) -> Result<()> {
    match node {
        serde_json::Value::String(s) => check(s),
        serde_json::Value::Array(items) => {
            for item in items {
                walk_strings(item, check)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for value in map.values() {
                walk_strings(value, check)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// BFS over transitions, condition events, and error fallbacks.
fn reachable_states(flow: &FlowDefinition) -> BTreeSet<&str> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    seen.insert(flow.initial_state.as_str());
    queue.push_back(flow.initial_state.as_str());

    while let Some(current) = queue.pop_front() {
        let Some(state) = flow.states.get(current) else {
            continue;
        };
        let mut targets: Vec<&str> = state.transitions.values().map(String::as_str).collect();
        if let Some(on_error) = &state.on_error {
            if let Some(fallback) = &on_error.fallback_state {
                targets.push(fallback.as_str());
            }
        }
        for target in targets {
            if seen.insert(target) {
                queue.push_back(target);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    fn executors() -> HashSet<String> {
        ["response", "search", "selection"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn flow(states: BTreeMap<String, State>, finals: &[&str]) -> FlowDefinition {
        FlowDefinition {
            id: "t_v1".into(),
            version: 1,
            name: "t".into(),
            module: FlowModule::General,
            trigger: None,
            requires_auth: false,
            initial_state: "start".into(),
            final_states: finals.iter().map(|s| s.to_string()).collect(),
            states,
        }
    }

    fn response_state(transitions: &[(&str, &str)]) -> State {
        State {
            kind: StateKind::Wait,
            actions: vec![Action {
                executor: "response".into(),
                config: json!({ "message": "hi" }),
                output: None,
            }],
            transitions: transitions
                .iter()
                .map(|(e, t)| (e.to_string(), t.to_string()))
                .collect(),
            conditions: vec![],
            on_error: None,
        }
    }

    #[test]
    fn valid_flow_passes() {
        let mut states = BTreeMap::new();
        states.insert("start".into(), response_state(&[("user_message", "end")]));
        states.insert("end".into(), response_state(&[]));
        let f = flow(states, &["end"]);
        let report = validate_flow(&f, &executors()).unwrap();
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn unknown_transition_target_fails() {
        let mut states = BTreeMap::new();
        states.insert("start".into(), response_state(&[("user_message", "ghost")]));
        let f = flow(states, &["start"]);
        assert!(validate_flow(&f, &executors()).is_err());
    }

    #[test]
    fn unregistered_executor_fails() {
        let mut states = BTreeMap::new();
        let mut s = response_state(&[]);
        s.actions[0].executor = "teleport".into();
        states.insert("start".into(), s);
        let f = flow(states, &["start"]);
        assert!(validate_flow(&f, &executors()).is_err());
    }

    #[test]
    fn empty_final_states_fails() {
        let mut states = BTreeMap::new();
        states.insert("start".into(), response_state(&[]));
        let f = flow(states, &[]);
        assert!(validate_flow(&f, &executors()).is_err());
    }

    #[test]
    fn reachable_dead_end_fails() {
        let mut states = BTreeMap::new();
        states.insert("start".into(), response_state(&[("user_message", "stuck")]));
        states.insert("stuck".into(), response_state(&[]));
        // "stuck" is reachable, has no way out, and is not final.
        let f = flow(states, &["start"]);
        assert!(validate_flow(&f, &executors()).is_err());
    }

    #[test]
    fn unreachable_state_warns_but_passes() {
        let mut states = BTreeMap::new();
        states.insert("start".into(), response_state(&[("user_message", "end")]));
        states.insert("end".into(), response_state(&[]));
        states.insert("orphan".into(), response_state(&[("user_message", "end")]));
        let f = flow(states, &["end"]);
        let report = validate_flow(&f, &executors()).unwrap();
        assert!(report.warnings.iter().any(|w| w.contains("orphan")));
    }

    #[test]
    fn unreachable_final_state_fails() {
        let mut states = BTreeMap::new();
        states.insert("start".into(), response_state(&[("user_message", "mid")]));
        states.insert("mid".into(), response_state(&[]));
        states.insert("island".into(), response_state(&[]));
        let f = flow(states, &["mid", "island"]);
        assert!(validate_flow(&f, &executors()).is_err());
    }

    #[test]
    fn malformed_template_fails() {
        let mut states = BTreeMap::new();
        let mut s = response_state(&[]);
        s.actions[0].config = json!({ "message": "hi {{broken" });
        states.insert("start".into(), s);
        let f = flow(states, &["start"]);
        assert!(validate_flow(&f, &executors()).is_err());
    }

    #[test]
    fn unknown_session_field_warns() {
        let mut states = BTreeMap::new();
        let mut s = response_state(&[]);
        s.actions[0].config = json!({ "message": "hi {{session.shoe_size}}" });
        states.insert("start".into(), s);
        let f = flow(states, &["start"]);
        let report = validate_flow(&f, &executors()).unwrap();
        assert!(report.warnings.iter().any(|w| w.contains("shoe_size")));
    }

    #[test]
    fn decision_expression_outside_grammar_fails() {
        let mut states = BTreeMap::new();
        states.insert(
            "start".into(),
            State {
                kind: StateKind::Decision,
                actions: vec![],
                transitions: BTreeMap::from([("go".to_string(), "end".to_string())]),
                conditions: vec![Condition {
                    expression: "eval(danger)".into(),
                    event: "go".into(),
                }],
                on_error: None,
            },
        );
        states.insert("end".into(), response_state(&[]));
        let f = flow(states, &["end"]);
        assert!(validate_flow(&f, &executors()).is_err());
    }

    #[test]
    fn error_fallback_counts_for_reachability() {
        let mut states = BTreeMap::new();
        let mut s = response_state(&[("user_message", "end")]);
        s.on_error = Some(OnError {
            retry: None,
            fallback_state: Some("apology".into()),
        });
        states.insert("start".into(), s);
        states.insert("end".into(), response_state(&[]));
        states.insert("apology".into(), response_state(&[]));
        let f = flow(states, &["end", "apology"]);
        let report = validate_flow(&f, &executors()).unwrap();
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn registry_may_hold_more_executors_than_a_flow_uses() {
        let mut states = BTreeMap::new();
        states.insert("start".into(), response_state(&[]));
        let f = flow(states, &["start"]);
        assert!(validate_flow(&f, &executors()).is_ok());
    }
}
