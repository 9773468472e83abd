use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on auto-advanced states per inbound message. Exceeding it
    /// fails the run with `internal/loop_detected`.
    #[serde(default = "d_auto_advance_max")]
    pub auto_advance_max: u32,
    /// Overall wall-clock budget for one turn, in milliseconds.
    #[serde(default = "d_turn_budget_ms")]
    pub turn_budget_ms: u64,
    /// Window in which an identical `(session, text)` pair is dropped.
    #[serde(default = "d_dedup_window_ms")]
    pub dedup_window_ms: u64,
    /// How long a second message waits behind an in-flight turn before the
    /// sender gets a "please wait" reply.
    #[serde(default = "d_lock_wait_ms")]
    pub per_session_lock_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_advance_max: d_auto_advance_max(),
            turn_budget_ms: d_turn_budget_ms(),
            dedup_window_ms: d_dedup_window_ms(),
            per_session_lock_wait_ms: d_lock_wait_ms(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NLU + router thresholds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluConfig {
    /// Below this, the fast classifier result is distrusted and the LLM
    /// fallback with a strict intent list runs instead.
    #[serde(default = "d_confidence")]
    pub confidence_threshold: f64,
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: d_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Minimum NLU confidence for an intent to start its triggered flow.
    #[serde(default = "d_trigger")]
    pub trigger_threshold: f64,
    /// Keyword → flow trigger fallback used when confidence is too low.
    #[serde(default = "d_keywords")]
    pub keywords: HashMap<String, String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: d_trigger(),
            keywords: d_keywords(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_auto_advance_max() -> u32 {
    25
}
fn d_turn_budget_ms() -> u64 {
    45_000
}
fn d_dedup_window_ms() -> u64 {
    5_000
}
fn d_lock_wait_ms() -> u64 {
    10_000
}
fn d_confidence() -> f64 {
    0.65
}
fn d_trigger() -> f64 {
    0.6
}
fn d_keywords() -> HashMap<String, String> {
    HashMap::from([
        ("parcel".into(), "send_parcel".into()),
        ("food".into(), "order_food".into()),
        ("shop".into(), "browse_products".into()),
        ("track".into(), "track_order".into()),
    ])
}
