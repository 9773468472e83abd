//! Generic call into the business backend by action code. Auth OTP,
//! order status, vendor and delivery sub-flows all ride through here.
//!
//! Error mapping: a backend `validation` rejection surfaces as the
//! executor's own prompt (the engine re-prompts and pauses); a business
//! rejection emits the `failed` flow event; transient problems come back
//! retryable.

use std::sync::Arc;

use serde_json::{json, Value};

use pv_domain::ErrorKind;
use pv_services::BackendClient;

use crate::executor::{ExecOutcome, Executor, TurnContext};

pub struct PhpApiExecutor {
    client: Arc<dyn BackendClient>,
}

impl PhpApiExecutor {
    pub fn new(client: Arc<dyn BackendClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Executor for PhpApiExecutor {
    fn name(&self) -> &'static str {
        "php_api"
    }

    async fn execute(&self, config: &Value, _ctx: &TurnContext) -> ExecOutcome {
        let Some(action) = config.get("action").and_then(Value::as_str) else {
            return ExecOutcome::fail(ErrorKind::Internal, "php_api config needs 'action'");
        };
        let params = config.get("params").cloned().unwrap_or(json!({}));

        match self.client.call(action, params).await {
            Ok(data) => ExecOutcome::ok().with_output(data).with_event("success"),
            Err(e) if e.kind() == ErrorKind::Upstream => {
                tracing::warn!(action, error = %e, "backend action rejected");
                ExecOutcome::ok()
                    .with_output(json!({ "error": e.to_string() }))
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
    use pv_services::mock::MockBackend;

    #[tokio::test]
    async fn success_returns_data_under_output() {
        let backend = Arc::new(MockBackend::default());
        backend.respond("auth.send_otp", json!({ "phone": "9923383838", "sent": true }));

        let outcome = PhpApiExecutor::new(backend.clone())
            .execute(
                &json!({ "action": "auth.send_otp", "params": { "phone": "9923383838" } }),
                &turn_ctx(json!({})),
            )
            .await;

        assert_eq!(outcome.events, vec!["success"]);
        assert_eq!(outcome.output.unwrap()["phone"], json!("9923383838"));
        assert_eq!(backend.calls.lock()[0].0, "auth.send_otp");
    }

    #[tokio::test]
    async fn business_rejection_becomes_failed_event() {
        let backend = Arc::new(MockBackend::default());
        backend.fail("auth.verify_otp", ErrorKind::Upstream, "wrong code");

        let outcome = PhpApiExecutor::new(backend)
            .execute(
                &json!({ "action": "auth.verify_otp", "params": {} }),
                &turn_ctx(json!({})),
            )
            .await;

        assert_eq!(outcome.events, vec!["failed"]);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn validation_rejection_is_a_validation_error() {
        let backend = Arc::new(MockBackend::default());
        backend.fail(
            "auth.send_otp",
            ErrorKind::Validation,
            "that doesn't look like a phone number",
        );

        let outcome = PhpApiExecutor::new(backend)
            .execute(
                &json!({ "action": "auth.send_otp", "params": {} }),
                &turn_ctx(json!({})),
            )
            .await;

        let error = outcome.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Validation);
        assert!(error.detail.contains("phone number"));
    }
}
