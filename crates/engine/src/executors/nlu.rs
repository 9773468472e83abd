//! Two-stage intent classification.
//!
//! The fast classifier runs first; when its confidence is below the
//! configured threshold, the LLM re-classifies against the closed intent
//! list (flow triggers + base conversational intents). Emits `high_conf`
//! or `low_conf` on the final confidence.

use std::sync::Arc;

use serde_json::{json, Value};

use pv_domain::config::Config;
use pv_domain::ErrorKind;
use pv_services::{LlmClient, LlmRequest, NluClient};

use crate::executor::{ExecOutcome, Executor, TurnContext};
use crate::executors::{SharedIntents, BASE_INTENTS};

pub struct NluExecutor {
    nlu: Arc<dyn NluClient>,
    llm: Arc<dyn LlmClient>,
    config: Arc<Config>,
    intents: SharedIntents,
}

impl NluExecutor {
    pub fn new(
        nlu: Arc<dyn NluClient>,
        llm: Arc<dyn LlmClient>,
        config: Arc<Config>,
        intents: SharedIntents,
    ) -> Self {
        Self {
            nlu,
            llm,
            config,
            intents,
        }
    }

    fn intent_list(&self) -> Vec<String> {
        let mut list = self.intents.read().clone();
        list.extend(BASE_INTENTS.iter().map(|s| s.to_string()));
        list
    }

    async fn llm_fallback(&self, text: &str) -> Option<(String, f64)> {
        let intents = self.intent_list();
        let request = LlmRequest {
            system_prompt: format!(
                "Classify the user message into exactly one of these intents: {}. \
                 Answer with JSON only.",
                intents.join(", ")
            ),
            user_prompt: text.to_string(),
            max_tokens: Some(64),
            temperature: Some(0.0),
            json_schema: Some(json!({
                "type": "object",
                "properties": {
                    "intent": { "type": "string", "enum": intents.clone() },
                    "confidence": { "type": "number" },
                },
                "required": ["intent"],
            })),
        };

        let response = self.llm.chat(request).await.ok()?;
        let parsed: Value = serde_json::from_str(&response.content).ok()?;
        let intent = parsed.get("intent")?.as_str()?.to_string();
        if !intents.contains(&intent) {
            return None;
        }
        let confidence = parsed
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.7);
        Some((intent, confidence))
    }
}

#[async_trait::async_trait]
impl Executor for NluExecutor {
    fn name(&self) -> &'static str {
        "nlu"
    }

    async fn execute(&self, config: &Value, _ctx: &TurnContext) -> ExecOutcome {
        let Some(text) = config.get("text").and_then(Value::as_str) else {
            return ExecOutcome::fail(ErrorKind::Internal, "nlu config needs 'text'");
        };

        let threshold = self.config.nlu.confidence_threshold;
        let mut result = match self.nlu.classify(text).await {
            Ok(r) => r,
            Err(e) => return ExecOutcome::from_error(&e),
        };

        if result.confidence < threshold {
            if let Some((intent, confidence)) = self.llm_fallback(text).await {
                tracing::debug!(
                    fast_intent = %result.intent,
                    fast_confidence = result.confidence,
                    llm_intent = %intent,
                    "low-confidence classification, LLM fallback used"
                );
                result.intent = intent;
                result.confidence = confidence;
            }
        }

        let event = if result.confidence >= threshold {
            "high_conf"
        } else {
            "low_conf"
        };
        ExecOutcome::ok()
            .with_output(json!({
                "intent": result.intent,
                "confidence": result.confidence,
                "entities": result.entities,
            }))
            .with_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_util::turn_ctx;
    use parking_lot::RwLock;
    use pv_services::mock::{MockLlm, MockNlu};
    use pv_services::NluResult;

    fn executor(nlu: Arc<MockNlu>, llm: Arc<MockLlm>) -> NluExecutor {
        NluExecutor::new(
            nlu,
            llm,
            Arc::new(Config::default()),
            Arc::new(RwLock::new(vec!["order_food".into(), "send_parcel".into()])),
        )
    }

    #[tokio::test]
    async fn confident_fast_path_skips_llm() {
        let nlu = Arc::new(MockNlu::default());
        nlu.program(
            "order pizza",
            NluResult {
                intent: "order_food".into(),
                confidence: 0.9,
                entities: json!({}),
            },
        );
        let llm = Arc::new(MockLlm::default());
        let outcome = executor(nlu, llm.clone())
            .execute(&json!({ "text": "order pizza" }), &turn_ctx(json!({})))
            .await;

        assert_eq!(outcome.events, vec!["high_conf"]);
        assert_eq!(outcome.output.unwrap()["intent"], json!("order_food"));
        assert_eq!(llm.calls_made(), 0);
    }

    #[tokio::test]
    async fn low_confidence_falls_back_to_llm() {
        let nlu = Arc::new(MockNlu::default()); // default: unknown @ 0.2
        let llm = Arc::new(MockLlm::default());
        llm.push_reply(r#"{"intent":"send_parcel","confidence":0.8}"#);

        let outcome = executor(nlu, llm.clone())
            .execute(
                &json!({ "text": "need something moved" }),
                &turn_ctx(json!({})),
            )
            .await;

        assert_eq!(outcome.events, vec!["high_conf"]);
        assert_eq!(outcome.output.unwrap()["intent"], json!("send_parcel"));
        assert_eq!(llm.calls_made(), 1);
    }

    #[tokio::test]
    async fn llm_answer_outside_the_closed_set_is_ignored() {
        let nlu = Arc::new(MockNlu::default());
        let llm = Arc::new(MockLlm::default());
        llm.push_reply(r#"{"intent":"hack_the_planet","confidence":0.99}"#);

        let outcome = executor(nlu, llm)
            .execute(&json!({ "text": "??" }), &turn_ctx(json!({})))
            .await;

        assert_eq!(outcome.events, vec!["low_conf"]);
        assert_eq!(outcome.output.unwrap()["intent"], json!("unknown"));
    }
}
