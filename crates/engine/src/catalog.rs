//! Validated flow catalog with atomic snapshot caching.
//!
//! Flows are validated against the executor registry, upserted to the
//! durable state path by `(id, version)`, and served from an immutable
//! in-memory snapshot. Readers clone an `Arc` — a turn never observes a
//! mid-flight definition change. The snapshot refreshes from disk after
//! its TTL or on explicit invalidation.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use pv_domain::trace::TraceEvent;
use pv_domain::{Error, Result};
use pv_flows::model::FlowDefinition;
use pv_flows::validate::validate_flow;

struct Snapshot {
    by_key: HashMap<(String, u32), Arc<FlowDefinition>>,
    latest: HashMap<String, Arc<FlowDefinition>>,
    by_trigger: HashMap<String, Arc<FlowDefinition>>,
}

impl Snapshot {
    fn build(flows: Vec<Arc<FlowDefinition>>) -> Self {
        let mut by_key = HashMap::new();
        let mut latest: HashMap<String, Arc<FlowDefinition>> = HashMap::new();
        let mut by_trigger = HashMap::new();

        for flow in flows {
            by_key.insert((flow.id.clone(), flow.version), flow.clone());
            match latest.get(&flow.id) {
                Some(existing) if existing.version >= flow.version => {}
                _ => {
                    latest.insert(flow.id.clone(), flow.clone());
                }
            }
        }
        // Triggers resolve against latest versions only.
        for flow in latest.values() {
            if let Some(trigger) = &flow.trigger {
                by_trigger.insert(trigger.clone(), flow.clone());
            }
        }

        Self {
            by_key,
            latest,
            by_trigger,
        }
    }
}

pub struct FlowCatalog {
    snapshot: RwLock<Arc<Snapshot>>,
    refreshed_at: RwLock<Instant>,
    ttl: Duration,
    /// `None` disables durable upsert (tests).
    flows_dir: Option<PathBuf>,
}

impl FlowCatalog {
    /// Validate and register a set of flows. Any validation failure
    /// aborts the whole registration (fail fast at boot).
    pub fn new(
        flows: Vec<FlowDefinition>,
        executor_names: &HashSet<String>,
        state_path: Option<&std::path::Path>,
        ttl: Duration,
    ) -> Result<Self> {
        let flows_dir = state_path.map(|p| p.join("flows"));
        if let Some(dir) = &flows_dir {
            std::fs::create_dir_all(dir).map_err(Error::Io)?;
        }

        let mut validated = Vec::new();
        for flow in flows {
            let report = validate_flow(&flow, executor_names)?;
            for warning in report.warnings {
                tracing::warn!("flow validation: {warning}");
            }
            TraceEvent::FlowRegistered {
                flow_id: flow.id.clone(),
                version: flow.version,
                states: flow.states.len(),
            }
            .emit();
            validated.push(Arc::new(flow));
        }

        let catalog = Self {
            snapshot: RwLock::new(Arc::new(Snapshot::build(validated.clone()))),
            refreshed_at: RwLock::new(Instant::now()),
            ttl,
            flows_dir,
        };
        catalog.upsert_durable(&validated);
        Ok(catalog)
    }

    fn upsert_durable(&self, flows: &[Arc<FlowDefinition>]) {
        let Some(dir) = &self.flows_dir else {
            return;
        };
        for flow in flows {
            let path = dir.join(format!("{}_v{}.json", flow.id, flow.version));
            match serde_json::to_string_pretty(flow.as_ref()) {
                Ok(json) => {
                    if let Err(e) = std::fs::write(&path, json) {
                        tracing::warn!(path = %path.display(), error = %e, "flow upsert failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "flow serialization failed"),
            }
        }
    }

    /// Reload the snapshot from the durable directory. Used by the TTL
    /// refresh and by explicit admin invalidation.
    fn reload_from_disk(&self) {
        let Some(dir) = &self.flows_dir else {
            *self.refreshed_at.write() = Instant::now();
            return;
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "flow cache reload failed, keeping old snapshot");
                *self.refreshed_at.write() = Instant::now();
                return;
            }
        };

        let mut flows = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(Error::Io)
                .and_then(|raw| serde_json::from_str::<FlowDefinition>(&raw).map_err(Error::Json))
            {
                Ok(flow) => flows.push(Arc::new(flow)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable flow")
                }
            }
        }
        if !flows.is_empty() {
            *self.snapshot.write() = Arc::new(Snapshot::build(flows));
        }
        *self.refreshed_at.write() = Instant::now();
    }

    fn maybe_refresh(&self) {
        if self.refreshed_at.read().elapsed() >= self.ttl {
            self.reload_from_disk();
        }
    }

    /// Drop the cache immediately (admin update hook).
    pub fn invalidate(&self) {
        self.reload_from_disk();
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.maybe_refresh();
        self.snapshot.read().clone()
    }

    /// Latest version of a flow.
    pub fn by_id(&self, flow_id: &str) -> Option<Arc<FlowDefinition>> {
        self.snapshot().latest.get(flow_id).cloned()
    }

    /// Exact `(id, version)` lookup — runs resume against the version
    /// they started on.
    pub fn get(&self, flow_id: &str, version: u32) -> Option<Arc<FlowDefinition>> {
        self.snapshot()
            .by_key
            .get(&(flow_id.to_string(), version))
            .cloned()
    }

    pub fn by_trigger(&self, intent: &str) -> Option<Arc<FlowDefinition>> {
        self.snapshot().by_trigger.get(intent).cloned()
    }

    /// All trigger intents, for the NLU closed set.
    pub fn triggers(&self) -> Vec<String> {
        self.snapshot().by_trigger.keys().cloned().collect()
    }

    pub fn list(&self) -> Vec<Arc<FlowDefinition>> {
        self.snapshot().latest.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor_names() -> HashSet<String> {
        [
            "response",
            "llm",
            "nlu",
            "search",
            "address",
            "distance",
            "zone",
            "pricing",
            "order",
            "external_search",
            "selection",
            "php_api",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    #[test]
    fn builtins_register_and_resolve_by_trigger() {
        let catalog = FlowCatalog::new(
            pv_flows::builtin::all(),
            &executor_names(),
            None,
            Duration::from_secs(300),
        )
        .unwrap();

        let food = catalog.by_trigger("order_food").unwrap();
        assert_eq!(food.id, pv_flows::builtin::FOOD_FLOW_ID);
        assert!(catalog.by_trigger("no_such_intent").is_none());
        assert_eq!(catalog.get(&food.id, food.version).unwrap().id, food.id);
    }

    #[test]
    fn bad_flow_aborts_registration() {
        let mut flows = pv_flows::builtin::all();
        flows[0].initial_state = "ghost".into();
        assert!(FlowCatalog::new(
            flows,
            &executor_names(),
            None,
            Duration::from_secs(300)
        )
        .is_err());
    }

    #[test]
    fn durable_upsert_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FlowCatalog::new(
            pv_flows::builtin::all(),
            &executor_names(),
            Some(dir.path()),
            Duration::from_secs(300),
        )
        .unwrap();

        // Reload from disk and confirm the same flows come back.
        catalog.invalidate();
        assert!(catalog.by_trigger("send_parcel").is_some());

        let saved = dir
            .path()
            .join("flows")
            .join(format!("{}_v1.json", pv_flows::builtin::PARCEL_FLOW_ID));
        let raw = std::fs::read_to_string(saved).unwrap();
        let loaded: FlowDefinition = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded.id, pv_flows::builtin::PARCEL_FLOW_ID);
    }

    #[test]
    fn latest_version_wins_for_triggers() {
        let mut v1 = pv_flows::builtin::all()
            .into_iter()
            .find(|f| f.id == pv_flows::builtin::TRACKING_FLOW_ID)
            .unwrap();
        let mut v2 = v1.clone();
        v2.version = 2;
        v2.name = "Tracking v2".into();
        v1.version = 1;

        let catalog = FlowCatalog::new(
            vec![v1, v2],
            &executor_names(),
            None,
            Duration::from_secs(300),
        )
        .unwrap();

        assert_eq!(catalog.by_trigger("track_order").unwrap().name, "Tracking v2");
        assert_eq!(
            catalog
                .get(pv_flows::builtin::TRACKING_FLOW_ID, 1)
                .unwrap()
                .version,
            1
        );
    }
}
