//! Shared HTTP plumbing for service clients.
//!
//! One `reqwest::Client` per service, a per-service timeout, and a
//! single place that classifies transport failures and status codes
//! into the error taxonomy. Remote services may also return a
//! structured `{kind, retryable, detail}` body, which is honored.

use std::time::Duration;

use serde_json::Value;

use pv_domain::config::ServiceEndpoint;
use pv_domain::{Error, ErrorKind, Result};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

pub struct HttpService {
    name: &'static str,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpService {
    pub fn new(name: &'static str, endpoint: &ServiceEndpoint) -> Self {
        let timeout = Duration::from_millis(endpoint.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let api_key = endpoint
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            name,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// POST a JSON body and return the parsed JSON response.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        self.decode(response).await
    }

    /// GET with query parameters.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        self.decode(response).await
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                service: self.name.to_string(),
            }
        } else {
            Error::service(self.name, ErrorKind::Transient, e.to_string())
        }
    }

    async fn decode(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(body);
        }

        // Prefer the structured error contract when the service speaks it.
        if let Some(err) = body.get("error") {
            let kind = err
                .get("kind")
                .and_then(Value::as_str)
                .map(parse_kind)
                .unwrap_or_else(|| status_kind(status));
            let detail = err
                .get("detail")
                .and_then(Value::as_str)
                .unwrap_or("request rejected")
                .to_string();
            return Err(Error::service(self.name, kind, detail));
        }

        Err(Error::service(
            self.name,
            status_kind(status),
            format!("HTTP {status}"),
        ))
    }
}

fn status_kind(status: reqwest::StatusCode) -> ErrorKind {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ErrorKind::Transient
    } else {
        ErrorKind::Upstream
    }
}

fn parse_kind(raw: &str) -> ErrorKind {
    match raw {
        "validation" => ErrorKind::Validation,
        "user_out_of_scope" => ErrorKind::UserOutOfScope,
        "transient" => ErrorKind::Transient,
        "upstream" => ErrorKind::Upstream,
        "cancelled" => ErrorKind::Cancelled,
        _ => ErrorKind::Internal,
    }
}
