//! Declarative flow definitions — the data model the engine executes.
//!
//! A flow is a named state machine: states run actions (executor
//! invocations) and pick the next state from event-keyed transitions.
//! Definitions are immutable once registered and versioned by
//! `(id, version)`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Well-known events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod event {
    /// Injected once when a run is created.
    pub const FLOW_STARTED: &str = "flow_started";
    /// An inbound user message resumed the run.
    pub const USER_MESSAGE: &str = "user_message";
    /// Synthesized when a non-final state produced no matching event.
    pub const WAITING_FOR_INPUT: &str = "waiting_for_input";
    /// Raised when an executor error escaped all handling.
    pub const ERROR: &str = "error";
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flow definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The business domain a flow belongs to; routes search and pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowModule {
    Food,
    Parcel,
    Ecommerce,
    General,
    Vendor,
    Delivery,
    Personalization,
    Location,
}

impl FlowModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowModule::Food => "food",
            FlowModule::Parcel => "parcel",
            FlowModule::Ecommerce => "ecommerce",
            FlowModule::General => "general",
            FlowModule::Vendor => "vendor",
            FlowModule::Delivery => "delivery",
            FlowModule::Personalization => "personalization",
            FlowModule::Location => "location",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    #[serde(default = "d_version")]
    pub version: u32,
    pub name: String,
    pub module: FlowModule,
    /// Intent name that starts this flow. `None` for sub-flows that are
    /// only entered programmatically.
    #[serde(default)]
    pub trigger: Option<String>,
    /// When true the orchestrator interposes the auth flow for
    /// unauthenticated sessions and stashes the original intent.
    #[serde(default)]
    pub requires_auth: bool,
    pub initial_state: String,
    pub final_states: BTreeSet<String>,
    pub states: BTreeMap<String, State>,
}

impl FlowDefinition {
    pub fn is_final(&self, state: &str) -> bool {
        self.final_states.contains(state)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// States
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// Runs actions, then evaluates transitions; pauses when nothing
    /// matches.
    #[default]
    Action,
    /// Pure routing — evaluates `conditions` in order, no side effects.
    Decision,
    /// Runs actions (typically a prompt) then unconditionally pauses
    /// until the next inbound event.
    Wait,
    /// Terminal.
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct State {
    #[serde(rename = "type", default)]
    pub kind: StateKind,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// event name → target state.
    #[serde(default)]
    pub transitions: BTreeMap<String, String>,
    /// Decision states only: evaluated in order, first true expression
    /// supplies the event.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub on_error: Option<OnError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub expression: String,
    pub event: String,
}

/// One executor invocation within a state. `config` may carry `{{path}}`
/// placeholders resolved against the turn context before the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub executor: String,
    #[serde(default)]
    pub config: serde_json::Value,
    /// Context key the executor's return value is stored under.
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OnError {
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub fallback_state: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
}

fn d_version() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_flow_deserializes_from_yaml() {
        let yaml = r#"
id: ping_v1
name: Ping
module: general
trigger: ping
initial_state: hello
final_states: [hello]
states:
  hello:
    type: end
    actions:
      - executor: response
        config:
          message: "pong"
"#;
        let flow: FlowDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(flow.id, "ping_v1");
        assert_eq!(flow.version, 1);
        assert!(flow.is_final("hello"));
        assert_eq!(flow.states["hello"].kind, StateKind::End);
        assert_eq!(flow.states["hello"].actions[0].executor, "response");
    }

    #[test]
    fn state_kind_defaults_to_action() {
        let yaml = "actions: []\ntransitions: {}\n";
        let state: State = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(state.kind, StateKind::Action);
    }
}
