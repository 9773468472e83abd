use std::sync::Arc;
use std::time::Instant;

use pv_domain::config::Config;
use pv_engine::FlowEngine;
use pv_services::ServiceSet;
use pv_sessions::{CentralAuth, SessionStore};

use crate::dedupe::DedupeCache;
use crate::metrics::Metrics;
use crate::session_lock::SessionLockMap;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core** — config, remote service clients, the flow engine
/// - **State** — sessions, centralized auth
/// - **Turn discipline** — dedup cache, per-session locks
/// - **Observability** — counters, start time
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub services: ServiceSet,
    pub engine: Arc<FlowEngine>,

    // ── State ─────────────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<CentralAuth>,

    // ── Turn discipline ───────────────────────────────────────────────
    pub dedupe: Arc<DedupeCache>,
    pub session_locks: Arc<SessionLockMap>,

    // ── Observability ─────────────────────────────────────────────────
    pub metrics: Arc<Metrics>,
    pub started_at: Instant,
}
