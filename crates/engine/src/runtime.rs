//! The flow engine runtime: start, resume, and inspect runs.
//!
//! Owns the catalog, the executor registry, and the run store; reads
//! session state only to snapshot it into the turn context and to keep
//! the `active_run_id` pointer honest.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use pv_domain::config::Config;
use pv_domain::reply::ReplyPayload;
use pv_domain::trace::TraceEvent;
use pv_domain::{Error, Result};
use pv_flows::context::SystemContext;
use pv_flows::model::event;
use pv_sessions::SessionStore;

use crate::catalog::FlowCatalog;
use crate::executor::ExecutorRegistry;
use crate::machine::Machine;
use crate::runs::{FlowRun, RunStatus, RunStore};

/// What one engine turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: ReplyPayload,
    pub run_id: Uuid,
    pub flow_id: String,
    pub status: RunStatus,
    /// The turn ended on a validation re-prompt (counted upstream).
    pub validation_reprompt: bool,
    /// Final run context — the orchestrator inspects it (e.g. to commit
    /// verified auth credentials after the login flow completes).
    pub run_context: Value,
}

pub struct FlowEngine {
    catalog: Arc<FlowCatalog>,
    registry: Arc<ExecutorRegistry>,
    runs: Arc<RunStore>,
    sessions: Arc<SessionStore>,
    config: Arc<Config>,
}

impl FlowEngine {
    pub fn new(
        catalog: Arc<FlowCatalog>,
        registry: Arc<ExecutorRegistry>,
        runs: Arc<RunStore>,
        sessions: Arc<SessionStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            catalog,
            registry,
            runs,
            sessions,
            config,
        }
    }

    pub fn catalog(&self) -> &FlowCatalog {
        &self.catalog
    }

    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    /// Start a flow for a session and advance it once with
    /// `flow_started`. Any still-active run for the session is cancelled
    /// first — a session has at most one active run.
    pub async fn start_flow(
        &self,
        flow_id: &str,
        session_id: &str,
        initial_context: Value,
    ) -> Result<TurnOutcome> {
        let flow = self
            .catalog
            .by_id(flow_id)
            .ok_or_else(|| Error::Flow(format!("unknown flow '{flow_id}'")))?;

        if let Some(existing) = self.get_active_flow(session_id) {
            tracing::warn!(
                session_id,
                old_run = %existing.run_id,
                "cancelling still-active run before starting a new flow"
            );
            self.runs.cancel(&existing.run_id);
        }

        let mut run = FlowRun::new(
            &flow.id,
            flow.version,
            session_id,
            &flow.initial_state,
            initial_context,
        );
        self.runs.insert(run.clone());
        self.sessions.update(session_id, |data| {
            data.active_run_id = Some(run.run_id);
            data.module_name = Some(flow.module.as_str().to_string());
        });

        TraceEvent::FlowStarted {
            run_id: run.run_id.to_string(),
            flow_id: flow.id.clone(),
            session_id: session_id.to_string(),
        }
        .emit();

        let (snapshot, system) = self.turn_inputs(session_id, &run);
        let machine = Machine {
            registry: &self.registry,
            runs: &self.runs,
            config: &self.config,
        };
        let result = machine
            .drive(
                &flow,
                &mut run,
                Some(event::FLOW_STARTED),
                None,
                snapshot,
                &system,
            )
            .await;

        self.release_if_terminal(session_id, &run);
        Ok(TurnOutcome {
            reply: result.reply,
            run_id: run.run_id,
            flow_id: flow.id.clone(),
            status: result.status,
            validation_reprompt: result.validation_reprompt,
            run_context: run.context,
        })
    }

    /// Resume the session's active run with an inbound user message.
    /// Returns `None` when there is nothing to resume.
    pub async fn resume_flow(
        &self,
        session_id: &str,
        user_message: &str,
    ) -> Result<Option<TurnOutcome>> {
        let Some(mut run) = self.get_active_flow(session_id) else {
            return Ok(None);
        };
        let Some(flow) = self.catalog.get(&run.flow_id, run.flow_version) else {
            // Definition vanished under the run; drop the pointer.
            tracing::warn!(flow_id = %run.flow_id, "active run references unknown flow");
            self.clear_pointer(session_id);
            return Ok(None);
        };

        let (snapshot, system) = self.turn_inputs(session_id, &run);
        let machine = Machine {
            registry: &self.registry,
            runs: &self.runs,
            config: &self.config,
        };
        let result = machine
            .drive(
                &flow,
                &mut run,
                Some(event::USER_MESSAGE),
                Some(user_message),
                snapshot,
                &system,
            )
            .await;

        self.release_if_terminal(session_id, &run);
        Ok(Some(TurnOutcome {
            reply: result.reply,
            run_id: run.run_id,
            flow_id: flow.id.clone(),
            status: result.status,
            validation_reprompt: result.validation_reprompt,
            run_context: run.context,
        }))
    }

    /// The session's run iff it is still running/waiting and its flow is
    /// known. A stale pointer is cleared lazily here.
    pub fn get_active_flow(&self, session_id: &str) -> Option<FlowRun> {
        let session = self.sessions.get(session_id)?;
        let run_id = session.data.active_run_id?;
        match self.runs.get(&run_id) {
            Some(run) if run.status.is_active() => Some(run),
            _ => {
                self.clear_pointer(session_id);
                None
            }
        }
    }

    /// Cancel the active run, if any (reset command / session clear).
    pub fn cancel_active(&self, session_id: &str) -> bool {
        let Some(session) = self.sessions.get(session_id) else {
            return false;
        };
        let Some(run_id) = session.data.active_run_id else {
            return false;
        };
        let cancelled = self.runs.cancel(&run_id);
        self.clear_pointer(session_id);
        cancelled
    }

    fn turn_inputs(&self, session_id: &str, run: &FlowRun) -> (Value, SystemContext) {
        let session = self.sessions.get(session_id);
        let snapshot = session
            .as_ref()
            .map(|s| s.snapshot())
            .unwrap_or_else(|| serde_json::json!({}));
        let system = SystemContext {
            session_id: session_id.to_string(),
            phone: session.and_then(|s| s.data.phone),
            now: chrono::Utc::now(),
            trace_id: format!("{}-{}", run.run_id.simple(), run.step_count),
        };
        (snapshot, system)
    }

    fn release_if_terminal(&self, session_id: &str, run: &FlowRun) {
        if !run.status.is_active() {
            self.clear_pointer(session_id);
        }
    }

    fn clear_pointer(&self, session_id: &str) {
        self.sessions.update(session_id, |data| {
            data.active_run_id = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{build_registry, SharedIntents};
    use parking_lot::RwLock;
    use pv_flows::model::*;
    use pv_services::mock::{mock_services, MockHandles};
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;

    fn harness_with_flows(flows: Vec<FlowDefinition>) -> (FlowEngine, MockHandles) {
        let config = Arc::new(pv_domain::config::Config::default());
        let (services, handles) = mock_services();
        let intents: SharedIntents = Arc::new(RwLock::new(vec![]));
        let registry = Arc::new(build_registry(&services, &config, intents).unwrap());
        let catalog = Arc::new(
            FlowCatalog::new(flows, &registry.names(), None, Duration::from_secs(300)).unwrap(),
        );
        let sessions = Arc::new(SessionStore::new(
            Duration::from_secs(3_600),
            Duration::from_secs(86_400),
        ));
        sessions.resolve_or_create("s1", "web:abc", "web");
        let engine = FlowEngine::new(
            catalog,
            registry,
            Arc::new(RunStore::new(None)),
            sessions,
            config,
        );
        (engine, handles)
    }

    fn harness() -> (FlowEngine, MockHandles) {
        harness_with_flows(pv_flows::builtin::all())
    }

    #[tokio::test]
    async fn parcel_start_prompts_and_waits() {
        let (engine, _) = harness();
        let outcome = engine
            .start_flow("parcel_delivery_v1", "s1", json!({}))
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Waiting);
        assert!(outcome.reply.text.contains("parcel pickup"));
        assert!(engine.get_active_flow("s1").is_some());
    }

    #[tokio::test]
    async fn resume_without_active_run_is_none() {
        let (engine, _) = harness();
        assert!(engine.resume_flow("s1", "hello").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn starting_a_second_flow_cancels_the_first() {
        let (engine, _) = harness();
        let first = engine
            .start_flow("parcel_delivery_v1", "s1", json!({}))
            .await
            .unwrap();
        let second = engine
            .start_flow("order_tracking_v1", "s1", json!({}))
            .await
            .unwrap();

        assert_eq!(
            engine.runs().status(&first.run_id),
            Some(RunStatus::Cancelled)
        );
        let active = engine.get_active_flow("s1").unwrap();
        assert_eq!(active.run_id, second.run_id);
    }

    #[tokio::test]
    async fn cancel_active_clears_the_pointer() {
        let (engine, _) = harness();
        let outcome = engine
            .start_flow("parcel_delivery_v1", "s1", json!({}))
            .await
            .unwrap();
        assert!(engine.cancel_active("s1"));
        assert!(engine.get_active_flow("s1").is_none());
        assert_eq!(
            engine.runs().status(&outcome.run_id),
            Some(RunStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn cyclic_decision_flow_fails_with_loop_detected() {
        let mut states = BTreeMap::new();
        states.insert(
            "ping".into(),
            State {
                kind: StateKind::Decision,
                actions: vec![],
                transitions: BTreeMap::from([("go".to_string(), "pong".to_string())]),
                conditions: vec![Condition {
                    expression: "true".into(),
                    event: "go".into(),
                }],
                on_error: None,
            },
        );
        states.insert(
            "pong".into(),
            State {
                kind: StateKind::Decision,
                actions: vec![],
                transitions: BTreeMap::from([("go".to_string(), "ping".to_string())]),
                conditions: vec![Condition {
                    expression: "true".into(),
                    event: "go".into(),
                }],
                on_error: None,
            },
        );
        states.insert(
            "end".into(),
            State {
                kind: StateKind::End,
                actions: vec![],
                transitions: BTreeMap::new(),
                conditions: vec![],
                on_error: None,
            },
        );
        // "end" keeps the validator's reachability rule satisfied.
        states.get_mut("ping").unwrap().transitions.insert("never".into(), "end".into());

        let flow = FlowDefinition {
            id: "cycle_v1".into(),
            version: 1,
            name: "cycle".into(),
            module: FlowModule::General,
            trigger: None,
            requires_auth: false,
            initial_state: "ping".into(),
            final_states: BTreeSet::from(["end".to_string()]),
            states,
        };

        let (engine, _) = harness_with_flows(vec![flow]);
        let outcome = engine.start_flow("cycle_v1", "s1", json!({})).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        let run = engine.runs().get(&outcome.run_id).unwrap();
        assert!(run.error.unwrap().contains("loop_detected"));
        // Failed run releases the session pointer.
        assert!(engine.get_active_flow("s1").is_none());
    }

    #[tokio::test]
    async fn retry_exhaustion_routes_to_fallback_state() {
        let mut states = BTreeMap::new();
        states.insert(
            "generate".into(),
            State {
                kind: StateKind::Action,
                actions: vec![Action {
                    executor: "llm".into(),
                    config: json!({ "user_prompt": "say hi" }),
                    output: Some("greeting".into()),
                }],
                transitions: BTreeMap::from([(
                    "waiting_for_input".to_string(),
                    "done".to_string(),
                )]),
                conditions: vec![],
                on_error: Some(OnError {
                    retry: Some(RetryPolicy {
                        attempts: 2,
                        backoff_ms: 10,
                    }),
                    fallback_state: Some("apology".into()),
                }),
            },
        );
        states.insert(
            "done".into(),
            State {
                kind: StateKind::End,
                actions: vec![Action {
                    executor: "response".into(),
                    config: json!({ "message": "{{greeting}}" }),
                    output: None,
                }],
                transitions: BTreeMap::new(),
                conditions: vec![],
                on_error: None,
            },
        );
        states.insert(
            "apology".into(),
            State {
                kind: StateKind::End,
                actions: vec![Action {
                    executor: "response".into(),
                    config: json!({ "message": "Sorry, we're having trouble right now." }),
                    output: None,
                }],
                transitions: BTreeMap::new(),
                conditions: vec![],
                on_error: None,
            },
        );

        let flow = FlowDefinition {
            id: "llm_retry_v1".into(),
            version: 1,
            name: "retry".into(),
            module: FlowModule::General,
            trigger: None,
            requires_auth: false,
            initial_state: "generate".into(),
            final_states: BTreeSet::from(["apology".to_string(), "done".to_string()]),
            states,
        };

        let (engine, mocks) = harness_with_flows(vec![flow]);
        mocks.llm.fail_with_timeout();

        let outcome = engine
            .start_flow("llm_retry_v1", "s1", json!({}))
            .await
            .unwrap();

        // First call + two retries, then the fallback branch.
        assert_eq!(mocks.llm.calls_made(), 3);
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.reply.text.contains("having trouble"));
    }

    #[tokio::test]
    async fn retry_exhaustion_without_fallback_fails_and_releases() {
        let mut states = BTreeMap::new();
        states.insert(
            "generate".into(),
            State {
                kind: StateKind::Action,
                actions: vec![Action {
                    executor: "llm".into(),
                    config: json!({ "user_prompt": "hi" }),
                    output: None,
                }],
                transitions: BTreeMap::from([("never".to_string(), "end".to_string())]),
                conditions: vec![],
                on_error: Some(OnError {
                    retry: Some(RetryPolicy {
                        attempts: 1,
                        backoff_ms: 10,
                    }),
                    fallback_state: None,
                }),
            },
        );
        states.insert(
            "end".into(),
            State {
                kind: StateKind::End,
                actions: vec![],
                transitions: BTreeMap::new(),
                conditions: vec![],
                on_error: None,
            },
        );
        let flow = FlowDefinition {
            id: "llm_fail_v1".into(),
            version: 1,
            name: "fail".into(),
            module: FlowModule::General,
            trigger: None,
            requires_auth: false,
            initial_state: "generate".into(),
            final_states: BTreeSet::from(["end".to_string()]),
            states,
        };

        let (engine, mocks) = harness_with_flows(vec![flow]);
        mocks.llm.fail_with_timeout();

        let outcome = engine.start_flow("llm_fail_v1", "s1", json!({})).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.reply.text.contains("Sorry"));
        assert!(engine.get_active_flow("s1").is_none());
    }
}
