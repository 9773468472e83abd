//! Process-local counters. Scraped via `GET /v1/metrics` and folded
//! into the health payload.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

#[derive(Default)]
pub struct Metrics {
    pub flow_starts: AtomicU64,
    pub flow_completions: AtomicU64,
    pub flow_failures_transient: AtomicU64,
    pub flow_failures_upstream: AtomicU64,
    pub flow_failures_internal: AtomicU64,
    pub flow_cancellations: AtomicU64,
    /// Turns that ended re-prompting after a validation error. These
    /// never fail the run, so they are counted separately from
    /// `flow_failures_*`.
    pub validation_reprompts: AtomicU64,
    pub loop_cap_hits: AtomicU64,
    pub dedup_drops: AtomicU64,
    pub lock_timeouts: AtomicU64,
    pub turns_processed: AtomicU64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Bucket a failed run by the error kind embedded in its detail.
    /// Validation never reaches here — it re-prompts instead of failing
    /// the run (see `validation_reprompts`).
    pub fn record_failure(&self, detail: &str) {
        let counter = if detail.contains("transient") || detail.contains("timed out") {
            &self.flow_failures_transient
        } else if detail.contains("upstream") {
            &self.flow_failures_upstream
        } else {
            &self.flow_failures_internal
        };
        Self::incr(counter);
        if detail.contains("loop_detected") {
            Self::incr(&self.loop_cap_hits);
        }
    }

    pub fn snapshot(&self) -> Value {
        json!({
            "flow_starts": self.flow_starts.load(Ordering::Relaxed),
            "flow_completions": self.flow_completions.load(Ordering::Relaxed),
            "flow_failures": {
                "transient": self.flow_failures_transient.load(Ordering::Relaxed),
                "upstream": self.flow_failures_upstream.load(Ordering::Relaxed),
                "internal": self.flow_failures_internal.load(Ordering::Relaxed),
            },
            "flow_cancellations": self.flow_cancellations.load(Ordering::Relaxed),
            "validation_reprompts": self.validation_reprompts.load(Ordering::Relaxed),
            "loop_cap_hits": self.loop_cap_hits.load(Ordering::Relaxed),
            "dedup_drops": self.dedup_drops.load(Ordering::Relaxed),
            "lock_timeouts": self.lock_timeouts.load(Ordering::Relaxed),
            "turns_processed": self.turns_processed.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_buckets_by_detail() {
        let metrics = Metrics::default();
        metrics.record_failure("llm: request timed out (transient)");
        metrics.record_failure("internal/loop_detected");
        assert_eq!(metrics.flow_failures_transient.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.flow_failures_internal.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.loop_cap_hits.load(Ordering::Relaxed), 1);
    }
}
