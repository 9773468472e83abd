//! Route distance + duration via the external routing service, with a
//! process-local cache keyed by coordinate pairs rounded to 5 decimals.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use pv_domain::geo::GeoPoint;
use pv_domain::{ErrorKind, Result};
use pv_services::{RouteEstimate, RoutingClient};

use crate::executor::{ExecOutcome, Executor, TurnContext};

type CacheKey = ((i64, i64), (i64, i64));

pub struct DistanceExecutor {
    client: Arc<dyn RoutingClient>,
    cache: Mutex<HashMap<CacheKey, RouteEstimate>>,
}

impl DistanceExecutor {
    pub fn new(client: Arc<dyn RoutingClient>) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn route_cached(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteEstimate> {
        let key = (from.rounded(), to.rounded());
        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(*cached);
        }
        let estimate = self.client.route(from, to).await?;
        self.cache.lock().insert(key, estimate);
        Ok(estimate)
    }
}

fn point_from(config: &Value, key: &str) -> Option<GeoPoint> {
    let node = config.get(key)?;
    Some(GeoPoint::new(
        node.get("lat")?.as_f64()?,
        node.get("lng")?.as_f64()?,
    ))
}

#[async_trait::async_trait]
impl Executor for DistanceExecutor {
    fn name(&self) -> &'static str {
        "distance"
    }

    async fn execute(&self, config: &Value, _ctx: &TurnContext) -> ExecOutcome {
        let (Some(from), Some(to)) = (point_from(config, "from"), point_from(config, "to"))
        else {
            return ExecOutcome::fail(
                ErrorKind::Validation,
                "distance needs 'from' and 'to' coordinate objects",
            );
        };

        match self.route_cached(from, to).await {
            Ok(estimate) => ExecOutcome::ok()
                .with_output(json!({
                    "km": estimate.km,
                    "duration_min": estimate.duration_min,
                }))
                .with_event("calculated"),
            // No route between the points is a flow branch, not a failure.
            Err(e) if e.kind() == ErrorKind::UserOutOfScope => {
                ExecOutcome::ok().with_event("unreachable")
            }
            Err(e) => ExecOutcome::from_error(&e),
        }
    }
}
