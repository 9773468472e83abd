//! Flow run records and their store.
//!
//! A run is one live instance of a flow for one session. The store keeps
//! runs in memory for fast resume and persists them to the state path:
//! runs as JSON documents updated in place, step records appended to a
//! per-run JSONL audit log. Writes are best-effort and asynchronous;
//! reads for resume are served from memory and are authoritative.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Running or waiting — the run still owns the dialog.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Waiting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Waiting => "waiting",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    pub run_id: Uuid,
    pub flow_id: String,
    pub flow_version: u32,
    pub session_id: String,
    pub current_state: String,
    pub status: RunStatus,
    pub context: Value,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Rough fraction of distinct states visited, 1.0 on completion.
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub step_count: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl FlowRun {
    pub fn new(
        flow_id: &str,
        flow_version: u32,
        session_id: &str,
        initial_state: &str,
        context: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            flow_id: flow_id.to_owned(),
            flow_version,
            session_id: session_id.to_owned(),
            current_state: initial_state.to_owned(),
            status: RunStatus::Running,
            context,
            started_at: now,
            updated_at: now,
            completed_at: None,
            progress: 0.0,
            step_count: 0,
            error: None,
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        let now = Utc::now();
        self.updated_at = now;
        self.completed_at = Some(now);
        if status == RunStatus::Completed {
            self.progress = 1.0;
        }
    }
}

/// One execution record inside a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepActionRecord {
    pub executor: String,
    pub duration_ms: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only audit record: one per state executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRunStep {
    pub run_id: Uuid,
    pub step_index: u32,
    pub state: String,
    pub event: String,
    pub actions_executed: Vec<StepActionRecord>,
    /// Outputs this state merged into the context.
    pub output_delta: Value,
    pub timestamp: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RunStore {
    runs: RwLock<HashMap<Uuid, FlowRun>>,
    /// `None` disables persistence (tests).
    state_dir: Option<PathBuf>,
}

impl RunStore {
    pub fn new(state_path: Option<&std::path::Path>) -> Self {
        let state_dir = state_path.map(|p| p.join("runs"));
        if let Some(dir) = &state_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(path = %dir.display(), error = %e, "cannot create run state dir");
            }
        }
        Self {
            runs: RwLock::new(HashMap::new()),
            state_dir,
        }
    }

    pub fn insert(&self, run: FlowRun) {
        self.runs.write().insert(run.run_id, run);
    }

    pub fn get(&self, run_id: &Uuid) -> Option<FlowRun> {
        self.runs.read().get(run_id).cloned()
    }

    pub fn status(&self, run_id: &Uuid) -> Option<RunStatus> {
        self.runs.read().get(run_id).map(|r| r.status)
    }

    pub fn update(&self, run_id: &Uuid, mutate: impl FnOnce(&mut FlowRun)) -> Option<FlowRun> {
        let mut runs = self.runs.write();
        let run = runs.get_mut(run_id)?;
        mutate(run);
        run.updated_at = Utc::now();
        Some(run.clone())
    }

    /// Mark a run cancelled. In-flight advances observe this before
    /// persisting their next step and abort cleanly.
    pub fn cancel(&self, run_id: &Uuid) -> bool {
        self.update(run_id, |run| {
            if run.status.is_active() {
                run.finish(RunStatus::Cancelled);
            }
        })
        .is_some()
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }

    /// Persist the run document. Fire-and-forget: failures are logged,
    /// never surfaced to the turn.
    pub fn persist(&self, run: &FlowRun) {
        let Some(dir) = &self.state_dir else {
            return;
        };
        let path = dir.join(format!("{}.json", run.run_id));
        let json = match serde_json::to_string_pretty(run) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "run serialization failed");
                return;
            }
        };
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::write(&path, json).await {
                tracing::warn!(path = %path.display(), error = %e, "run persist failed");
            }
        });
    }

    /// Append a step record to the run's JSONL audit log.
    pub fn append_step(&self, step: &FlowRunStep) {
        let Some(dir) = &self.state_dir else {
            return;
        };
        let path = dir.join(format!("{}.steps.jsonl", step.run_id));
        let line = match serde_json::to_string(step) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "step serialization failed");
                return;
            }
        };
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let result = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await;
            match result {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                        tracing::warn!(path = %path.display(), error = %e, "step append failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "step log open failed");
                }
            }
        });
    }

    /// Drop terminal runs older than the given age (background sweeper).
    pub fn evict_terminal(&self, older_than: chrono::Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let mut runs = self.runs.write();
        let before = runs.len();
        runs.retain(|_, run| run.status.is_active() || run.updated_at > cutoff);
        before - runs.len()
    }
}
