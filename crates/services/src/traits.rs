use serde::{Deserialize, Serialize};
use serde_json::Value;

use pv_domain::geo::GeoPoint;
use pv_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Intent classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluResult {
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub entities: Value,
}

/// A provider-agnostic generation request.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// When set, the provider is asked for JSON conforming to this schema.
    pub json_schema: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    /// Prompt + completion tokens, best effort (0 when unknown).
    pub tokens_used: u32,
    /// Which provider in the fallback chain answered.
    pub provider_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub module: String,
    pub query: String,
    pub zone_id: Option<String>,
    pub geo: Option<GeoPoint>,
    pub filters: Value,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    /// Items carry at minimum `{id, name, price, store_id}`.
    pub items: Vec<Value>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteEstimate {
    pub km: f64,
    pub duration_min: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneInfo {
    #[serde(default)]
    pub zone_id: Option<String>,
    pub serviceable: bool,
    #[serde(default)]
    pub zone_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub subtotal: f64,
    pub delivery: f64,
    pub tax: f64,
    pub total: f64,
    #[serde(default)]
    pub breakdown: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceHit {
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub maps_link: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait NluClient: Send + Sync {
    async fn classify(&self, text: &str) -> Result<NluResult>;
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, req: LlmRequest) -> Result<LlmResponse>;
}

#[async_trait::async_trait]
pub trait SearchClient: Send + Sync {
    async fn query(&self, req: SearchRequest) -> Result<SearchResults>;
}

#[async_trait::async_trait]
pub trait RoutingClient: Send + Sync {
    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteEstimate>;
}

#[async_trait::async_trait]
pub trait ZoneClient: Send + Sync {
    async fn zone_for(&self, point: GeoPoint, module: &str) -> Result<ZoneInfo>;
}

#[async_trait::async_trait]
pub trait PricingClient: Send + Sync {
    async fn quote(&self, order_type: &str, payload: Value) -> Result<Quote>;
}

#[async_trait::async_trait]
pub trait OrderClient: Send + Sync {
    /// Place an order. The idempotency key makes retries safe: the
    /// backend returns the original receipt for a repeated key.
    async fn place(&self, payload: Value, idempotency_key: &str) -> Result<OrderReceipt>;
}

#[async_trait::async_trait]
pub trait PlacesClient: Send + Sync {
    async fn search(&self, query: &str, city: Option<&str>) -> Result<Vec<PlaceHit>>;
}

#[async_trait::async_trait]
pub trait BackendClient: Send + Sync {
    /// Generic call to the business backend by action code
    /// (`auth.send_otp`, `auth.verify_otp`, `order.status`, vendor and
    /// delivery actions).
    async fn call(&self, action: &str, params: Value) -> Result<Value>;
}

#[async_trait::async_trait]
pub trait AsrClient: Send + Sync {
    /// Transcribe an audio attachment (by channel media URL) to text.
    async fn transcribe(&self, media_url: &str) -> Result<String>;
}
