//! Serviceable-zone check. Out-of-zone is a user-visible flow branch
//! (`out_of_zone`), never an error.

use std::sync::Arc;

use serde_json::{json, Value};

use pv_domain::geo::GeoPoint;
use pv_domain::ErrorKind;
use pv_services::ZoneClient;

use crate::executor::{ExecOutcome, Executor, TurnContext};

pub struct ZoneExecutor {
    client: Arc<dyn ZoneClient>,
}

impl ZoneExecutor {
    pub fn new(client: Arc<dyn ZoneClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Executor for ZoneExecutor {
    fn name(&self) -> &'static str {
        "zone"
    }

    async fn execute(&self, config: &Value, _ctx: &TurnContext) -> ExecOutcome {
        let (Some(lat), Some(lng)) = (
            config.get("lat").and_then(Value::as_f64),
            config.get("lng").and_then(Value::as_f64),
        ) else {
            return ExecOutcome::fail(ErrorKind::Validation, "zone needs numeric 'lat'/'lng'");
        };
        let module = config
            .get("module")
            .and_then(Value::as_str)
            .unwrap_or("general");

        let info = match self.client.zone_for(GeoPoint::new(lat, lng), module).await {
            Ok(i) => i,
            Err(e) => return ExecOutcome::from_error(&e),
        };

        let event = if info.serviceable {
            "in_zone"
        } else {
            "out_of_zone"
        };
        ExecOutcome::ok()
            .with_output(json!({
                "zone_id": info.zone_id,
                "serviceable": info.serviceable,
                "zone_name": info.zone_name,
            }))
            .with_event(event)
    }
}
