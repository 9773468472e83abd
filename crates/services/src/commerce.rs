//! Pricing quotes and order placement against the commerce backend.
//!
//! The core never hardcodes rate formulas — every total comes from the
//! remote quote service. Order placement carries an idempotency key so
//! a retried request cannot double-book.

use serde_json::{json, Value};

use pv_domain::config::ServiceEndpoint;
use pv_domain::{Error, ErrorKind, Result};

use crate::http::HttpService;
use crate::traits::{OrderClient, OrderReceipt, PricingClient, Quote};

pub struct HttpPricingClient {
    http: HttpService,
}

impl HttpPricingClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        Self {
            http: HttpService::new("pricing", endpoint),
        }
    }
}

#[async_trait::async_trait]
impl PricingClient for HttpPricingClient {
    async fn quote(&self, order_type: &str, payload: Value) -> Result<Quote> {
        let body = json!({ "type": order_type, "payload": payload });
        let response = self.http.post_json("/quote", &body).await?;
        serde_json::from_value(response).map_err(|e| {
            Error::service("pricing", ErrorKind::Upstream, format!("bad payload: {e}"))
        })
    }
}

pub struct HttpOrderClient {
    http: HttpService,
}

impl HttpOrderClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        Self {
            http: HttpService::new("order", endpoint),
        }
    }
}

#[async_trait::async_trait]
impl OrderClient for HttpOrderClient {
    async fn place(&self, payload: Value, idempotency_key: &str) -> Result<OrderReceipt> {
        let body = json!({
            "payload": payload,
            "idempotency_key": idempotency_key,
        });
        let response = self.http.post_json("/orders", &body).await?;
        serde_json::from_value(response).map_err(|e| {
            Error::service("order", ErrorKind::Upstream, format!("bad payload: {e}"))
        })
    }
}
