use serde::Serialize;

/// Structured trace events emitted across all Palaver crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type")]
pub enum TraceEvent {
    ExecutorInvoked {
        executor: String,
        duration_ms: u64,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },
    StateTransition {
        run_id: String,
        from: String,
        to: String,
        event: String,
    },
    FlowStarted {
        run_id: String,
        flow_id: String,
        session_id: String,
    },
    FlowFinished {
        run_id: String,
        flow_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },
    AutoAdvanceCapHit {
        run_id: String,
        state: String,
        cap: u32,
    },
    TurnBudgetExceeded {
        run_id: String,
        budget_ms: u64,
    },
    SessionResolved {
        session_id: String,
        platform: String,
        is_new: bool,
    },
    SessionConflict {
        session_id: String,
        expected_version: u64,
        found_version: u64,
    },
    DedupDrop {
        session_id: String,
    },
    IntentClassified {
        session_id: String,
        intent: String,
        confidence: f64,
    },
    LlmFallback {
        from_provider: String,
        to_provider: String,
        reason: String,
    },
    AuthEventPublished {
        phone_tail: String,
        channel: String,
        login: bool,
    },
    FlowRegistered {
        flow_id: String,
        version: u32,
        states: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "pv_event");
    }
}

/// Keep only the last four digits of a phone number for logging.
pub fn phone_tail(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        "****".into()
    } else {
        format!("****{}", &digits[digits.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_tail_masks_all_but_last_four() {
        assert_eq!(phone_tail("+91 99233 83838"), "****3838");
        assert_eq!(phone_tail("123"), "****");
    }
}
