//! Product / store index search. Honors the zone filter when present;
//! result items carry the `store_id` downstream steps need.

use std::sync::Arc;

use serde_json::{json, Value};

use pv_domain::geo::GeoPoint;
use pv_domain::ErrorKind;
use pv_services::{SearchClient, SearchRequest};

use crate::executor::{ExecOutcome, Executor, TurnContext};

const DEFAULT_SIZE: usize = 5;

pub struct SearchExecutor {
    client: Arc<dyn SearchClient>,
}

impl SearchExecutor {
    pub fn new(client: Arc<dyn SearchClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Executor for SearchExecutor {
    fn name(&self) -> &'static str {
        "search"
    }

    async fn execute(&self, config: &Value, _ctx: &TurnContext) -> ExecOutcome {
        let Some(query) = config.get("query").and_then(Value::as_str) else {
            return ExecOutcome::fail(ErrorKind::Internal, "search config needs 'query'");
        };
        let Some(module) = config.get("module").and_then(Value::as_str) else {
            return ExecOutcome::fail(ErrorKind::Internal, "search config needs 'module'");
        };

        // Interpolation turns a missing zone into "" — both mean no filter.
        let zone_id = config
            .get("zone_id")
            .and_then(Value::as_str)
            .filter(|z| !z.is_empty())
            .map(str::to_owned);
        let geo = match (
            config.get("lat").and_then(Value::as_f64),
            config.get("lng").and_then(Value::as_f64),
        ) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        };

        let request = SearchRequest {
            module: module.to_owned(),
            query: query.to_owned(),
            zone_id,
            geo,
            filters: config.get("filters").cloned().unwrap_or(json!({})),
            size: config
                .get("size")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_SIZE),
        };

        let results = match self.client.query(request).await {
            Ok(r) => r,
            Err(e) => return ExecOutcome::from_error(&e),
        };

        let event = if results.items.is_empty() {
            "no_results"
        } else {
            "found"
        };
        ExecOutcome::ok()
            .with_output(json!({ "items": results.items, "total": results.total }))
            .with_event(event)
    }
}
