//! The state-machine advance loop.
//!
//! One call to [`Machine::drive`] processes one inbound event: it runs
//! the current state's actions (interpolating configs against the turn
//! context), merges outputs, selects a transition, and auto-advances
//! through action/decision states until the run pauses, completes, or
//! fails. A hard iteration cap bounds runaway flows and an overall turn
//! budget bounds wall-clock time.

use std::collections::HashSet;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use pv_domain::config::Config;
use pv_domain::reply::{Button, ReplyPayload};
use pv_domain::trace::TraceEvent;
use pv_domain::ErrorKind;
use pv_flows::context::{build_turn_context, merge, SystemContext, LAST_EVENT, LAST_USER_MESSAGE};
use pv_flows::expr::evaluate;
use pv_flows::model::{event, Action, FlowDefinition, State, StateKind};
use pv_flows::template::interpolate;

use crate::executor::{ExecOutcome, ExecutorRegistry, TurnContext};
use crate::runs::{FlowRun, FlowRunStep, RunStatus, RunStore, StepActionRecord};

const APOLOGY: &str =
    "Sorry — something went wrong on our side. Please try again in a moment.";
const BUDGET_EXCEEDED: &str =
    "This is taking longer than it should — please try again in a moment.";
/// Backoff for the implicit single retry of transient errors.
const DEFAULT_BACKOFF_MS: u64 = 250;

pub(crate) struct Machine<'a> {
    pub registry: &'a ExecutorRegistry,
    pub runs: &'a RunStore,
    pub config: &'a Config,
}

pub(crate) struct DriveResult {
    pub reply: ReplyPayload,
    pub status: RunStatus,
    /// True when the turn ended on a validation re-prompt (the run is
    /// waiting on the same state for a corrected message).
    pub validation_reprompt: bool,
}

/// What a single action left the state loop with.
enum ActionFlow {
    Continue,
    Pause,
    /// Validation failure: the prompt is already in the reply; stay on
    /// this state and wait for a corrected message.
    Reprompt,
    Fallback(String),
    Fail(String),
    Abort,
}

impl<'a> Machine<'a> {
    pub(crate) async fn drive(
        &self,
        flow: &FlowDefinition,
        run: &mut FlowRun,
        inbound_event: Option<&str>,
        user_message: Option<&str>,
        session_snapshot: Value,
        system: &SystemContext,
    ) -> DriveResult {
        let deadline =
            Instant::now() + Duration::from_millis(self.config.engine.turn_budget_ms);
        let llm_tokens = Arc::new(AtomicU32::new(0));
        let mut reply = ReplyPayload::default();

        // Snapshot for the budget-exceeded revert: a blown budget fails
        // the turn without advancing the run.
        let entry_state = run.current_state.clone();
        let entry_context = run.context.clone();
        let entry_status = run.status;

        let mut ctx = build_turn_context(run.context.clone(), session_snapshot, system);
        if let Some(text) = user_message {
            set_internal(&mut ctx, LAST_USER_MESSAGE, json!(text));
        }
        if let Some(ev) = inbound_event {
            set_internal(&mut ctx, LAST_EVENT, json!(ev));
        }

        // A waiting run resumes: the paused state already ran its prompt.
        let mut resuming = entry_status == RunStatus::Waiting && inbound_event.is_some();
        // True until an input-consuming executor has spent the message.
        let mut input_available = inbound_event == Some(event::USER_MESSAGE);
        run.status = RunStatus::Running;

        let mut visited: HashSet<String> = HashSet::new();
        let mut steps_taken: u32 = 0;
        let mut validation_reprompt = false;

        loop {
            // External cancellation (reset command, session clear).
            if self.cancelled(run) {
                return self.abort(run);
            }

            steps_taken += 1;
            if steps_taken > self.config.engine.auto_advance_max {
                TraceEvent::AutoAdvanceCapHit {
                    run_id: run.run_id.to_string(),
                    state: run.current_state.clone(),
                    cap: self.config.engine.auto_advance_max,
                }
                .emit();
                return self.fail_run(flow, run, ctx, reply, "internal/loop_detected");
            }

            if Instant::now() >= deadline {
                TraceEvent::TurnBudgetExceeded {
                    run_id: run.run_id.to_string(),
                    budget_ms: self.config.engine.turn_budget_ms,
                }
                .emit();
                run.current_state = entry_state;
                run.context = entry_context;
                run.status = RunStatus::Waiting;
                self.sync(run);
                return DriveResult {
                    reply: ReplyPayload::text(BUDGET_EXCEEDED),
                    status: RunStatus::Waiting,
                    validation_reprompt: false,
                };
            }

            let state_name = run.current_state.clone();
            let Some(state) = flow.states.get(&state_name) else {
                return self.fail_run(flow, run, ctx, reply, "internal/invalid_state");
            };
            visited.insert(state_name.clone());

            // Auto-advance guard: never chain into a state whose first
            // action wants the user's message once it is already spent.
            if steps_taken > 1
                && !input_available
                && state.kind == StateKind::Action
                && self.first_action_awaits_input(state)
            {
                run.status = RunStatus::Waiting;
                self.record_step(run, &state_name, "auto_advance_hold", vec![], Map::new());
                break;
            }

            let run_actions = match state.kind {
                StateKind::Decision => false,
                StateKind::Wait => !resuming,
                _ => true,
            };

            let mut candidates: Vec<String> = Vec::new();
            let mut records: Vec<StepActionRecord> = Vec::new();
            let mut output_delta: Map<String, Value> = Map::new();
            let mut paused = false;
            let mut terminal: Option<ActionFlow> = None;

            if run_actions {
                for action in &state.actions {
                    let flow_control = self
                        .run_action(
                            state,
                            &state_name,
                            action,
                            &mut ctx,
                            run,
                            &llm_tokens,
                            deadline,
                            &mut reply,
                            &mut records,
                            &mut output_delta,
                            &mut candidates,
                        )
                        .await;

                    if let Some(executor) = self.registry.get(&action.executor) {
                        if executor.awaits_input() {
                            input_available = false;
                        }
                    }
                    match flow_control {
                        ActionFlow::Continue => {}
                        ActionFlow::Pause => {
                            paused = true;
                            break;
                        }
                        other => {
                            terminal = Some(other);
                            break;
                        }
                    }
                }
            }

            match terminal {
                Some(ActionFlow::Abort) => return self.abort(run),
                Some(ActionFlow::Reprompt) => {
                    validation_reprompt = true;
                    run.status = RunStatus::Waiting;
                    self.record_step(run, &state_name, "validation_reprompt", records, output_delta);
                    break;
                }
                Some(ActionFlow::Fallback(target)) => {
                    self.record_step(run, &state_name, event::ERROR, records, output_delta);
                    self.transition(run, &state_name, &target, event::ERROR, &mut ctx);
                    resuming = false;
                    continue;
                }
                Some(ActionFlow::Fail(detail)) => {
                    self.record_step(run, &state_name, event::ERROR, records, output_delta);
                    return self.fail_run(flow, run, ctx, reply, &detail);
                }
                _ => {}
            }

            if paused {
                run.status = RunStatus::Waiting;
                self.record_step(run, &state_name, "pause", records, output_delta);
                break;
            }

            // ── Transition selection ─────────────────────────────────
            let chosen: Option<(String, String)> = if state.kind == StateKind::Decision {
                state
                    .conditions
                    .iter()
                    .find(|c| evaluate(&c.expression, &ctx))
                    .and_then(|c| {
                        state
                            .transitions
                            .get(&c.event)
                            .map(|target| (c.event.clone(), target.clone()))
                    })
            } else if state.kind == StateKind::Wait && run_actions {
                // A wait state that just ran its prompt pauses no matter
                // what its actions emitted.
                None
            } else {
                let mut events = candidates;
                if steps_taken == 1 {
                    if let Some(ev) = inbound_event {
                        events.push(ev.to_string());
                    }
                }
                events
                    .iter()
                    .find_map(|ev| {
                        state
                            .transitions
                            .get(ev)
                            .map(|target| (ev.clone(), target.clone()))
                    })
            };

            match chosen {
                Some((ev, target)) => {
                    self.record_step(run, &state_name, &ev, records, output_delta);
                    self.transition(run, &state_name, &target, &ev, &mut ctx);
                    run.progress =
                        (visited.len() as f32 / flow.states.len().max(1) as f32).min(0.95);
                    resuming = false;
                }
                None => {
                    if flow.is_final(&state_name) {
                        self.record_step(run, &state_name, "completed", records, output_delta);
                        run.finish(RunStatus::Completed);
                        TraceEvent::FlowFinished {
                            run_id: run.run_id.to_string(),
                            flow_id: flow.id.clone(),
                            status: "completed".into(),
                            error_kind: None,
                        }
                        .emit();
                        break;
                    }
                    if state.kind == StateKind::Wait && run_actions {
                        run.status = RunStatus::Waiting;
                        self.record_step(run, &state_name, "wait", records, output_delta);
                        break;
                    }
                    // Nothing matched: synthesize waiting_for_input.
                    if let Some(target) = state.transitions.get(event::WAITING_FOR_INPUT) {
                        let target = target.clone();
                        self.record_step(
                            run,
                            &state_name,
                            event::WAITING_FOR_INPUT,
                            records,
                            output_delta,
                        );
                        self.transition(
                            run,
                            &state_name,
                            &target,
                            event::WAITING_FOR_INPUT,
                            &mut ctx,
                        );
                        resuming = false;
                        continue;
                    }
                    run.status = RunStatus::Waiting;
                    self.record_step(
                        run,
                        &state_name,
                        event::WAITING_FOR_INPUT,
                        records,
                        output_delta,
                    );
                    break;
                }
            }
        }

        run.context = ctx;
        self.sync(run);
        DriveResult {
            reply,
            status: run.status,
            validation_reprompt,
        }
    }

    // ── Single action with retry policy ──────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn run_action(
        &self,
        state: &State,
        state_name: &str,
        action: &Action,
        ctx: &mut Value,
        run: &FlowRun,
        llm_tokens: &Arc<AtomicU32>,
        deadline: Instant,
        reply: &mut ReplyPayload,
        records: &mut Vec<StepActionRecord>,
        output_delta: &mut Map<String, Value>,
        candidates: &mut Vec<String>,
    ) -> ActionFlow {
        let Some(executor) = self.registry.get(&action.executor) else {
            return ActionFlow::Fail(format!("unknown executor '{}'", action.executor));
        };

        let timeout = Duration::from_millis(self.config.executor_timeout_ms(&action.executor));
        let (max_retries, mut backoff_ms) = match state.on_error.as_ref().and_then(|o| o.retry) {
            Some(retry) => (retry.attempts, retry.backoff_ms),
            // Without a declared policy, transient errors get one
            // implicit retry (or the configured per-executor count).
            None => (
                self.config.executor_retries(&action.executor).max(1),
                DEFAULT_BACKOFF_MS,
            ),
        };

        let mut attempt: u32 = 0;
        loop {
            if self.cancelled(run) {
                return ActionFlow::Abort;
            }

            let interpolated = interpolate(&action.config, ctx);
            let turn_ctx = TurnContext {
                session_id: run.session_id.clone(),
                run_id: run.run_id,
                state: state_name.to_string(),
                context: ctx.clone(),
                llm_tokens_used: llm_tokens.clone(),
            };

            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                timeout,
                executor.execute(&interpolated, &turn_ctx),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => ExecOutcome::fail(
                    ErrorKind::Transient,
                    format!("{} timed out after {}ms", action.executor, timeout.as_millis()),
                ),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let error_kind = outcome.error.as_ref().map(|e| e.kind.as_str().to_string());
            TraceEvent::ExecutorInvoked {
                executor: action.executor.clone(),
                duration_ms,
                ok: outcome.error.is_none(),
                error_kind: error_kind.clone(),
            }
            .emit();
            records.push(StepActionRecord {
                executor: action.executor.clone(),
                duration_ms,
                ok: outcome.error.is_none(),
                error: outcome.error.as_ref().map(|e| e.detail.clone()),
            });

            let Some(error) = outcome.error else {
                // Success: merge output, collect reply bits and events.
                if let (Some(key), Some(value)) = (&action.output, outcome.output) {
                    merge(ctx, key, value.clone());
                    output_delta.insert(key.clone(), value);
                }
                if let Some(text) = outcome.response {
                    reply.push_text(&text);
                }
                reply.cards.extend(outcome.cards);
                reply.buttons.extend(outcome.buttons);
                candidates.extend(outcome.events);
                return if outcome.pause {
                    ActionFlow::Pause
                } else {
                    ActionFlow::Continue
                };
            };

            // ── Error path ───────────────────────────────────────────
            let backoff = Duration::from_millis(backoff_ms);
            if error.retryable
                && attempt < max_retries
                && Instant::now() + backoff < deadline
            {
                attempt += 1;
                tracing::debug!(
                    executor = %action.executor,
                    attempt,
                    backoff_ms,
                    "retrying after transient error"
                );
                tokio::time::sleep(backoff).await;
                backoff_ms = backoff_ms.saturating_mul(2);
                continue;
            }

            return match error.kind {
                ErrorKind::Cancelled => ActionFlow::Abort,
                ErrorKind::Validation => {
                    // The failing executor's own prompt is what the user
                    // sees; fall back to the error detail.
                    let prompt = outcome.response.unwrap_or(error.detail);
                    reply.push_text(&prompt);
                    ActionFlow::Reprompt
                }
                _ => {
                    if let Some(fallback) = state
                        .on_error
                        .as_ref()
                        .and_then(|o| o.fallback_state.clone())
                    {
                        ActionFlow::Fallback(fallback)
                    } else if let Some(target) = state.transitions.get(event::ERROR) {
                        ActionFlow::Fallback(target.clone())
                    } else {
                        ActionFlow::Fail(format!(
                            "{}: {} ({})",
                            action.executor, error.detail, error.kind
                        ))
                    }
                }
            };
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn first_action_awaits_input(&self, state: &State) -> bool {
        state
            .actions
            .first()
            .and_then(|a| self.registry.get(&a.executor))
            .map(|e| e.awaits_input())
            .unwrap_or(false)
    }

    fn cancelled(&self, run: &FlowRun) -> bool {
        matches!(
            self.runs.status(&run.run_id),
            Some(RunStatus::Cancelled)
        )
    }

    fn abort(&self, run: &mut FlowRun) -> DriveResult {
        run.finish(RunStatus::Cancelled);
        // Silent by contract: a cancelled turn emits no user message.
        DriveResult {
            reply: ReplyPayload::default(),
            status: RunStatus::Cancelled,
            validation_reprompt: false,
        }
    }

    fn transition(
        &self,
        run: &mut FlowRun,
        from: &str,
        to: &str,
        event_name: &str,
        ctx: &mut Value,
    ) {
        TraceEvent::StateTransition {
            run_id: run.run_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            event: event_name.to_string(),
        }
        .emit();
        set_internal(ctx, LAST_EVENT, json!(event_name));
        run.current_state = to.to_string();
    }

    fn record_step(
        &self,
        run: &mut FlowRun,
        state: &str,
        event_name: &str,
        actions_executed: Vec<StepActionRecord>,
        output_delta: Map<String, Value>,
    ) {
        // A cancellation that raced in wins: nothing more is persisted.
        if self.cancelled(run) {
            return;
        }
        run.step_count += 1;
        let step = FlowRunStep {
            run_id: run.run_id,
            step_index: run.step_count,
            state: state.to_string(),
            event: event_name.to_string(),
            actions_executed,
            output_delta: Value::Object(output_delta),
            timestamp: chrono::Utc::now(),
        };
        self.runs.append_step(&step);
    }

    fn fail_run(
        &self,
        flow: &FlowDefinition,
        run: &mut FlowRun,
        ctx: Value,
        mut reply: ReplyPayload,
        detail: &str,
    ) -> DriveResult {
        run.context = ctx;
        run.error = Some(detail.to_string());
        run.finish(RunStatus::Failed);
        TraceEvent::FlowFinished {
            run_id: run.run_id.to_string(),
            flow_id: flow.id.clone(),
            status: "failed".into(),
            error_kind: Some(detail.to_string()),
        }
        .emit();
        self.sync(run);

        reply.push_text(APOLOGY);
        if let Some(last) = run
            .context
            .get(LAST_USER_MESSAGE)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            reply
                .buttons
                .push(Button::quick_reply("retry", "Try again", last));
        }
        DriveResult {
            reply,
            status: RunStatus::Failed,
            validation_reprompt: false,
        }
    }

    /// Write the mutated run back into the store and persist it, unless
    /// a cancellation raced in.
    fn sync(&self, run: &FlowRun) {
        if self.cancelled(run) {
            return;
        }
        self.runs.update(&run.run_id, |stored| *stored = run.clone());
        self.runs.persist(run);
    }
}

fn set_internal(ctx: &mut Value, key: &str, value: Value) {
    if let Some(map) = ctx.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}
