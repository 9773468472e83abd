//! Fast intent classifier client.

use serde_json::json;

use pv_domain::config::ServiceEndpoint;
use pv_domain::{Error, ErrorKind, Result};

use crate::http::HttpService;
use crate::traits::{NluClient, NluResult};

pub struct HttpNluClient {
    http: HttpService,
}

impl HttpNluClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        Self {
            http: HttpService::new("nlu", endpoint),
        }
    }
}

#[async_trait::async_trait]
impl NluClient for HttpNluClient {
    async fn classify(&self, text: &str) -> Result<NluResult> {
        let body = json!({ "text": text });
        let response = self.http.post_json("/classify", &body).await?;
        serde_json::from_value(response)
            .map_err(|e| Error::service("nlu", ErrorKind::Upstream, format!("bad payload: {e}")))
    }
}
