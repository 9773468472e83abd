use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stores (sessions, auth, durable run state)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for durable state (flow definitions, runs, step logs).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Idle TTL for sessions; refreshed on every activity.
    #[serde(default = "d_session_ttl")]
    pub session_ttl_seconds: u64,
    /// Absolute TTL for sessions regardless of activity.
    #[serde(default = "d_session_abs_ttl")]
    pub session_absolute_ttl_seconds: u64,
    /// TTL for phone-keyed auth records; refreshed on use.
    #[serde(default = "d_auth_ttl")]
    pub auth_ttl_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            session_ttl_seconds: d_session_ttl(),
            session_absolute_ttl_seconds: d_session_abs_ttl(),
            auth_ttl_seconds: d_auth_ttl(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_session_ttl() -> u64 {
    3_600
}
fn d_session_abs_ttl() -> u64 {
    86_400
}
fn d_auth_ttl() -> u64 {
    604_800
}
