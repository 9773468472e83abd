//! Natural-language (or structured JSON) generation.
//!
//! Enforces the per-turn token cap and always appends a language-match
//! instruction so replies mirror the user's language. With `json_schema`
//! in the config the provider is asked for conforming JSON and the
//! output is the parsed value, not text.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;

use pv_domain::config::Config;
use pv_domain::ErrorKind;
use pv_services::{LlmClient, LlmRequest};

use crate::executor::{ExecOutcome, Executor, TurnContext};

const LANGUAGE_INSTRUCTION: &str =
    "Always reply in the same language the user wrote their last message in.";

pub struct LlmExecutor {
    client: Arc<dyn LlmClient>,
    config: Arc<Config>,
}

impl LlmExecutor {
    pub fn new(client: Arc<dyn LlmClient>, config: Arc<Config>) -> Self {
        Self { client, config }
    }
}

#[async_trait::async_trait]
impl Executor for LlmExecutor {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn execute(&self, config: &Value, ctx: &TurnContext) -> ExecOutcome {
        let cap = self.config.llm.max_tokens_per_turn;
        let used = ctx.llm_tokens_used.load(Ordering::SeqCst);
        if used >= cap {
            return ExecOutcome::fail(
                ErrorKind::Internal,
                format!("per-turn LLM token cap reached ({used}/{cap})"),
            );
        }

        let system_prompt = config
            .get("system_prompt")
            .and_then(Value::as_str)
            .unwrap_or("You are a helpful ordering assistant.");
        let user_prompt = config
            .get("user_prompt")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| {
                ctx.context
                    .get("_last_user_message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned()
            });
        let json_schema = config.get("json_schema").cloned();
        let wants_json = json_schema.is_some();

        let request = LlmRequest {
            system_prompt: format!("{system_prompt}\n{LANGUAGE_INSTRUCTION}"),
            user_prompt,
            max_tokens: config
                .get("max_tokens")
                .and_then(Value::as_u64)
                .map(|n| (n as u32).min(cap - used)),
            temperature: config
                .get("temperature")
                .and_then(Value::as_f64)
                .map(|t| t as f32),
            json_schema,
        };

        let response = match self.client.chat(request).await {
            Ok(r) => r,
            Err(e) => return ExecOutcome::from_error(&e),
        };
        ctx.llm_tokens_used
            .fetch_add(response.tokens_used, Ordering::SeqCst);

        if wants_json {
            match serde_json::from_str::<Value>(&response.content) {
                Ok(parsed) => ExecOutcome::ok().with_output(parsed),
                Err(e) => ExecOutcome::fail(
                    ErrorKind::Upstream,
                    format!("model did not return valid JSON: {e}"),
                ),
            }
        } else {
            ExecOutcome::ok()
                .with_output(Value::String(response.content.clone()))
                .with_response(response.content)
        }
    }
}
