//! Order placement with a deterministic idempotency key.
//!
//! The key is a pure function of `(session_id, run_id, state)`, so a
//! retried invocation — engine retry or a duplicate turn slipping past
//! dedup — recomputes the identical key and gets the original receipt
//! back instead of a second order. The key also rides in the output so
//! the run's audit trail shows what the backend saw. A business
//! rejection emits the `failed` flow event rather than an error.

use std::sync::Arc;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use pv_domain::ErrorKind;
use pv_services::OrderClient;

use crate::executor::{ExecOutcome, Executor, TurnContext};

pub struct OrderExecutor {
    client: Arc<dyn OrderClient>,
}

impl OrderExecutor {
    pub fn new(client: Arc<dyn OrderClient>) -> Self {
        Self { client }
    }

    pub(crate) fn idempotency_key(ctx: &TurnContext) -> String {
        let digest = Sha256::digest(
            format!("{}:{}:{}", ctx.session_id, ctx.run_id, ctx.state).as_bytes(),
        );
        hex::encode(&digest[..16])
    }
}

#[async_trait::async_trait]
impl Executor for OrderExecutor {
    fn name(&self) -> &'static str {
        "order"
    }

    async fn execute(&self, config: &Value, ctx: &TurnContext) -> ExecOutcome {
        if config.get("type").and_then(Value::as_str).is_none() {
            return ExecOutcome::fail(ErrorKind::Internal, "order config needs 'type'");
        }

        let key = Self::idempotency_key(ctx);

        match self.client.place(config.clone(), &key).await {
            Ok(receipt) => ExecOutcome::ok()
                .with_output(json!({
                    "order_id": receipt.order_id,
                    "status": receipt.status,
                    "idempotency_key": key,
                }))
                .with_event("success"),
            Err(e) if e.kind() == ErrorKind::Upstream => {
                tracing::warn!(error = %e, "order rejected by backend");
                ExecOutcome::ok()
                    .with_output(json!({ "error": e.to_string(), "idempotency_key": key }))
                    .with_event("failed")
            }
            Err(e) => ExecOutcome::from_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_util::turn_ctx;
    use pv_services::mock::MockOrder;

    fn config() -> Value {
        json!({ "type": "parcel", "payment": "COD", "pricing": { "total": 60.0 } })
    }

    #[tokio::test]
    async fn repeat_invocation_returns_same_order_once() {
        let order = Arc::new(MockOrder::default());
        let exec = OrderExecutor::new(order.clone());
        let ctx = turn_ctx(json!({}));

        let first = exec.execute(&config(), &ctx).await;
        let second = exec.execute(&config(), &ctx).await;

        let id1 = first.output.unwrap()["order_id"].clone();
        let id2 = second.output.unwrap()["order_id"].clone();
        assert_eq!(id1, id2);
        assert_eq!(order.placed_count(), 1, "exactly one side effect");
    }

    #[tokio::test]
    async fn different_runs_get_different_keys() {
        let a = OrderExecutor::idempotency_key(&turn_ctx(json!({})));
        let b = OrderExecutor::idempotency_key(&turn_ctx(json!({})));
        assert_ne!(a, b, "run ids differ, keys must differ");
    }

    #[tokio::test]
    async fn upstream_rejection_becomes_failed_event() {
        let order = Arc::new(MockOrder::default());
        order.fail_with(ErrorKind::Upstream);
        let outcome = OrderExecutor::new(order)
            .execute(&config(), &turn_ctx(json!({})))
            .await;
        assert_eq!(outcome.events, vec!["failed"]);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn transient_failure_is_a_retryable_error() {
        let order = Arc::new(MockOrder::default());
        order.fail_with(ErrorKind::Transient);
        let outcome = OrderExecutor::new(order)
            .execute(&config(), &turn_ctx(json!({})))
            .await;
        assert!(outcome.error.unwrap().retryable);
    }
}
