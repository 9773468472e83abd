//! The PHP business backend (generic action calls) and the ASR service.

use serde_json::{json, Value};

use pv_domain::config::ServiceEndpoint;
use pv_domain::{Error, ErrorKind, Result};

use crate::http::HttpService;
use crate::traits::{AsrClient, BackendClient};

pub struct HttpBackendClient {
    http: HttpService,
}

impl HttpBackendClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        Self {
            http: HttpService::new("backend", endpoint),
        }
    }
}

#[async_trait::async_trait]
impl BackendClient for HttpBackendClient {
    async fn call(&self, action: &str, params: Value) -> Result<Value> {
        let body = json!({ "action": action, "params": params });
        let response = self.http.post_json("/api/action", &body).await?;
        // The backend wraps successful payloads in `data`.
        Ok(response.get("data").cloned().unwrap_or(response))
    }
}

pub struct HttpAsrClient {
    http: HttpService,
}

impl HttpAsrClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        Self {
            http: HttpService::new("asr", endpoint),
        }
    }
}

#[async_trait::async_trait]
impl AsrClient for HttpAsrClient {
    async fn transcribe(&self, media_url: &str) -> Result<String> {
        let body = json!({ "media_url": media_url });
        let response = self.http.post_json("/transcribe", &body).await?;
        response
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::service("asr", ErrorKind::Upstream, "no transcript in reply"))
    }
}
