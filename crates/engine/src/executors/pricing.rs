//! Order total computation — fully delegated to the remote quote
//! service. The core never hardcodes a rate formula.

use std::sync::Arc;

use serde_json::{json, Value};

use pv_domain::ErrorKind;
use pv_services::PricingClient;

use crate::executor::{ExecOutcome, Executor, TurnContext};

pub struct PricingExecutor {
    client: Arc<dyn PricingClient>,
}

impl PricingExecutor {
    pub fn new(client: Arc<dyn PricingClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Executor for PricingExecutor {
    fn name(&self) -> &'static str {
        "pricing"
    }

    async fn execute(&self, config: &Value, _ctx: &TurnContext) -> ExecOutcome {
        let Some(order_type) = config.get("type").and_then(Value::as_str) else {
            return ExecOutcome::fail(ErrorKind::Internal, "pricing config needs 'type'");
        };

        // Everything but `type` is the quote payload.
        let mut payload = config.clone();
        if let Some(map) = payload.as_object_mut() {
            map.remove("type");
        }

        let quote = match self.client.quote(order_type, payload).await {
            Ok(q) => q,
            Err(e) => return ExecOutcome::from_error(&e),
        };

        ExecOutcome::ok()
            .with_output(json!({
                "subtotal": quote.subtotal,
                "delivery": quote.delivery,
                "tax": quote.tax,
                "total": quote.total,
                "breakdown": quote.breakdown,
            }))
            .with_event("calculated")
    }
}
