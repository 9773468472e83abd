//! The uniform executor contract and the name→implementation registry.
//!
//! An executor is a named action handler with heterogeneous config. It
//! either succeeds (output / response / events) or returns a classified
//! error — it never panics or throws across the boundary. Registration
//! happens once at startup and is closed before the engine accepts
//! traffic; a duplicate name is a boot failure.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use pv_domain::reply::{Button, Card};
use pv_domain::{Error, ErrorKind};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn context handed to executors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-only view of the turn an executor runs inside. The JSON
/// `context` includes `system.*`, `session.*`, prior action outputs and
/// `_last_user_message`; executors return values, the engine merges them.
#[derive(Clone)]
pub struct TurnContext {
    pub session_id: String,
    pub run_id: Uuid,
    /// Name of the state the action belongs to.
    pub state: String,
    pub context: Value,
    /// LLM tokens consumed so far this turn (shared cap).
    pub llm_tokens_used: Arc<AtomicU32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ExecError {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub detail: String,
}

impl ExecError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.retryable(),
            detail: detail.into(),
        }
    }
}

impl From<&Error> for ExecError {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            retryable: e.retryable(),
            detail: e.to_string(),
        }
    }
}

/// What one executor invocation produced.
#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    /// Stored under the action's declared `output` key.
    pub output: Option<Value>,
    /// Events offered to the state machine, in order.
    pub events: Vec<String>,
    /// Text appended to the turn's reply.
    pub response: Option<String>,
    pub cards: Vec<Card>,
    pub buttons: Vec<Button>,
    /// When true the engine pauses after this action.
    pub pause: bool,
    pub error: Option<ExecError>,
}

impl ExecOutcome {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            error: Some(ExecError::new(kind, detail)),
            ..Default::default()
        }
    }

    pub fn from_error(e: &Error) -> Self {
        Self {
            error: Some(ExecError::from(e)),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_event(mut self, event: &str) -> Self {
        self.events.push(event.to_string());
        self
    }

    pub fn with_response(mut self, text: impl Into<String>) -> Self {
        self.response = Some(text.into());
        self
    }

    pub fn with_cards(mut self, cards: Vec<Card>) -> Self {
        self.cards = cards;
        self
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }

    pub fn paused(mut self) -> Self {
        self.pause = true;
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait + registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Declared capability: true when the first thing this executor does
    /// is consume the inbound user message. The auto-advance rule will
    /// not chain into such a state once the turn's message is spent.
    fn awaits_input(&self) -> bool {
        false
    }

    /// Run the action. `config` arrives fully interpolated. Must never
    /// panic; failures come back in `ExecOutcome::error`.
    async fn execute(&self, config: &Value, ctx: &TurnContext) -> ExecOutcome;
}

pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor. Duplicate names are a startup error.
    pub fn register(&mut self, executor: Arc<dyn Executor>) -> pv_domain::Result<()> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(Error::Config(format!("duplicate executor '{name}'")));
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Executor>> {
        self.executors.get(name)
    }

    pub fn names(&self) -> HashSet<String> {
        self.executors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// A throwaway turn context for executor unit tests.
    pub(crate) fn turn_ctx(context: Value) -> TurnContext {
        TurnContext {
            session_id: "s-test".into(),
            run_id: Uuid::new_v4(),
            state: "state-test".into(),
            context,
            llm_tokens_used: Arc::new(AtomicU32::new(0)),
        }
    }
}
