//! Boot wiring.
//!
//! The orchestrator, flow engine, and session store reference each
//! other; everything is constructed here in one step with interface-
//! typed fields and no runtime DI container. [`build_state`] is also
//! the entry point for integration tests, which pass mock services and
//! a temp state dir.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use pv_domain::config::Config;
use pv_domain::Result;
use pv_engine::executors::{build_registry, SharedIntents};
use pv_engine::{FlowCatalog, FlowEngine, RunStore};
use pv_services::ServiceSet;
use pv_sessions::{CentralAuth, SessionStore};

use crate::dedupe::DedupeCache;
use crate::metrics::Metrics;
use crate::session_lock::SessionLockMap;
use crate::state::AppState;

/// Construct the full application state. `persist` controls whether the
/// catalog and run store write to `config.store.state_path`.
pub fn build_state(config: Arc<Config>, services: ServiceSet, persist: bool) -> Result<AppState> {
    let state_path = persist.then(|| config.store.state_path.clone());

    // ── Sessions + auth ──────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new(
        Duration::from_secs(config.store.session_ttl_seconds),
        Duration::from_secs(config.store.session_absolute_ttl_seconds),
    ));
    let auth = Arc::new(CentralAuth::new(Duration::from_secs(
        config.store.auth_ttl_seconds,
    )));

    // ── Executors ────────────────────────────────────────────────────
    // The NLU fallback's closed intent set depends on the catalog, which
    // is validated against the registry — wire the shared list after
    // both exist.
    let intents: SharedIntents = Arc::new(RwLock::new(Vec::new()));
    let registry = Arc::new(build_registry(&services, &config, intents.clone())?);
    tracing::info!(executors = registry.len(), "executor registry ready");

    // ── Flow catalog ─────────────────────────────────────────────────
    let flows = pv_flows::loader::load_all(config.flows.path.as_deref())?;
    let catalog = Arc::new(FlowCatalog::new(
        flows,
        &registry.names(),
        state_path.as_deref(),
        Duration::from_secs(config.flows.cache_ttl_seconds),
    )?);
    *intents.write() = catalog.triggers();
    tracing::info!(
        flows = catalog.list().len(),
        triggers = catalog.triggers().len(),
        "flow catalog ready"
    );

    // ── Engine ───────────────────────────────────────────────────────
    let runs = Arc::new(RunStore::new(state_path.as_deref()));
    let engine = Arc::new(FlowEngine::new(
        catalog,
        registry,
        runs,
        sessions.clone(),
        config.clone(),
    ));

    Ok(AppState {
        dedupe: Arc::new(DedupeCache::new(Duration::from_millis(
            config.engine.dedup_window_ms,
        ))),
        session_locks: Arc::new(SessionLockMap::new()),
        metrics: Arc::new(Metrics::default()),
        started_at: Instant::now(),
        config,
        services,
        engine,
        sessions,
        auth,
    })
}

/// Background upkeep: TTL sweeps, lock pruning, terminal-run eviction,
/// and the cross-channel auth sync listener.
pub fn spawn_background(state: &AppState) {
    // ── Minute sweeper ───────────────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let sessions = state.sessions.sweep();
                let auth = state.auth.sweep();
                let dedupe = state.dedupe.sweep();
                state.session_locks.prune_idle();
                let runs = state.engine.runs().evict_terminal(chrono::Duration::hours(1));
                if sessions + auth + dedupe + runs > 0 {
                    tracing::debug!(sessions, auth, dedupe, runs, "sweeper evicted");
                }
            }
        });
    }

    // ── Auth sync: mirror logins/logouts into live sessions ──────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut rx = state.auth.subscribe();
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                };
                apply_auth_event(&state, &event);
            }
        });
    }
}

/// Push an auth event into every live session sharing the phone. The
/// receiver side is idempotent, so at-least-once delivery is fine.
pub fn apply_auth_event(state: &AppState, event: &pv_sessions::AuthEvent) {
    let phone = event.phone().to_string();
    for session_id in state.sessions.sessions_for_phone(&phone) {
        match event {
            pv_sessions::AuthEvent::Login { user_id, token, .. } => {
                state.sessions.update(&session_id, |data| {
                    let already = data.auth_token.as_deref() == Some(token.as_str());
                    data.authenticated = true;
                    data.user_id = Some(*user_id);
                    data.auth_token = Some(token.clone());
                    if !already {
                        data.pending_notices
                            .push("You've been logged in on another device.".into());
                    }
                });
            }
            pv_sessions::AuthEvent::Logout { .. } => {
                state.sessions.update(&session_id, |data| {
                    if data.authenticated {
                        data.authenticated = false;
                        data.user_id = None;
                        data.auth_token = None;
                        data.pending_notices
                            .push("You've been logged out on another device.".into());
                    }
                });
            }
        }
    }
}
