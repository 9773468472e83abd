//! LLM client with a configuration-ordered provider fallback chain.
//!
//! Providers are tried strictly in config order; each gets its own
//! timeout; the first non-error response wins. Only retryable failures
//! (timeouts, 5xx) advance the chain — a content-level rejection from a
//! provider is returned as-is.

use std::time::Duration;

use serde_json::{json, Value};

use pv_domain::config::{LlmConfig, LlmProviderConfig};
use pv_domain::trace::TraceEvent;
use pv_domain::{Error, ErrorKind, Result};

use crate::traits::{LlmClient, LlmRequest, LlmResponse};

struct Provider {
    id: String,
    url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl Provider {
    fn new(config: &LlmProviderConfig) -> Self {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            id: config.id.clone(),
            url: config.url.clone(),
            model: config.model.clone(),
            api_key,
            client,
        }
    }

    async fn chat(&self, req: &LlmRequest, default_max_tokens: u32) -> Result<LlmResponse> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": req.system_prompt },
                { "role": "user", "content": req.user_prompt },
            ],
            "max_tokens": req.max_tokens.unwrap_or(default_max_tokens),
        });
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(schema) = &req.json_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": "reply", "schema": schema },
            });
        }

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    service: format!("llm:{}", self.id),
                }
            } else {
                Error::service(format!("llm:{}", self.id), ErrorKind::Transient, e.to_string())
            }
        })?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let kind = if status.is_server_error() || status.as_u16() == 429 {
                ErrorKind::Transient
            } else {
                ErrorKind::Upstream
            };
            return Err(Error::service(
                format!("llm:{}", self.id),
                kind,
                format!("HTTP {status}"),
            ));
        }

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return Err(Error::service(
                format!("llm:{}", self.id),
                ErrorKind::Upstream,
                "empty completion",
            ));
        }
        let tokens_used = payload["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32;

        Ok(LlmResponse {
            content,
            tokens_used,
            provider_id: self.id.clone(),
        })
    }
}

pub struct HttpLlmChain {
    providers: Vec<Provider>,
    default_max_tokens: u32,
}

impl HttpLlmChain {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            providers: config.providers.iter().map(Provider::new).collect(),
            default_max_tokens: config.default_max_tokens,
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for HttpLlmChain {
    async fn chat(&self, req: LlmRequest) -> Result<LlmResponse> {
        let mut last_error: Option<Error> = None;

        for (i, provider) in self.providers.iter().enumerate() {
            match provider.chat(&req, self.default_max_tokens).await {
                Ok(response) => return Ok(response),
                Err(e) if e.retryable() && i + 1 < self.providers.len() => {
                    TraceEvent::LlmFallback {
                        from_provider: provider.id.clone(),
                        to_provider: self.providers[i + 1].id.clone(),
                        reason: e.to_string(),
                    }
                    .emit();
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::service("llm", ErrorKind::Internal, "no LLM providers configured")
        }))
    }
}
