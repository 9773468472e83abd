//! Programmable in-memory service clients.
//!
//! Used by engine and gateway tests (every scenario runs against these,
//! fully deterministic) and as the stub behind unconfigured endpoints.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use pv_domain::geo::GeoPoint;
use pv_domain::{Error, ErrorKind, Result};

use crate::traits::*;
use crate::ServiceSet;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unconfigured stub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stands in for a service with no URL in the config. Every call fails
/// with an internal error naming the missing endpoint.
pub struct Unconfigured {
    name: &'static str,
}

impl Unconfigured {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }

    fn err<T>(&self) -> Result<T> {
        Err(Error::service(
            self.name,
            ErrorKind::Internal,
            format!("services.{} has no url configured", self.name),
        ))
    }
}

#[async_trait::async_trait]
impl NluClient for Unconfigured {
    async fn classify(&self, _text: &str) -> Result<NluResult> {
        self.err()
    }
}

#[async_trait::async_trait]
impl LlmClient for Unconfigured {
    async fn chat(&self, _req: LlmRequest) -> Result<LlmResponse> {
        self.err()
    }
}

#[async_trait::async_trait]
impl SearchClient for Unconfigured {
    async fn query(&self, _req: SearchRequest) -> Result<SearchResults> {
        self.err()
    }
}

#[async_trait::async_trait]
impl RoutingClient for Unconfigured {
    async fn route(&self, _from: GeoPoint, _to: GeoPoint) -> Result<RouteEstimate> {
        self.err()
    }
}

#[async_trait::async_trait]
impl ZoneClient for Unconfigured {
    async fn zone_for(&self, _point: GeoPoint, _module: &str) -> Result<ZoneInfo> {
        self.err()
    }
}

#[async_trait::async_trait]
impl PricingClient for Unconfigured {
    async fn quote(&self, _order_type: &str, _payload: Value) -> Result<Quote> {
        self.err()
    }
}

#[async_trait::async_trait]
impl OrderClient for Unconfigured {
    async fn place(&self, _payload: Value, _key: &str) -> Result<OrderReceipt> {
        self.err()
    }
}

#[async_trait::async_trait]
impl PlacesClient for Unconfigured {
    async fn search(&self, _query: &str, _city: Option<&str>) -> Result<Vec<PlaceHit>> {
        self.err()
    }
}

#[async_trait::async_trait]
impl BackendClient for Unconfigured {
    async fn call(&self, _action: &str, _params: Value) -> Result<Value> {
        self.err()
    }
}

#[async_trait::async_trait]
impl AsrClient for Unconfigured {
    async fn transcribe(&self, _media_url: &str) -> Result<String> {
        self.err()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Programmable mocks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MockNlu {
    by_text: Mutex<HashMap<String, NluResult>>,
    default: Mutex<Option<NluResult>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockNlu {
    pub fn program(&self, text: &str, result: NluResult) {
        self.by_text.lock().insert(text.to_lowercase(), result);
    }

    pub fn set_default(&self, result: NluResult) {
        *self.default.lock() = Some(result);
    }
}

#[async_trait::async_trait]
impl NluClient for MockNlu {
    async fn classify(&self, text: &str) -> Result<NluResult> {
        self.calls.lock().push(text.to_string());
        if let Some(result) = self.by_text.lock().get(&text.to_lowercase()) {
            return Ok(result.clone());
        }
        Ok(self.default.lock().clone().unwrap_or(NluResult {
            intent: "unknown".into(),
            confidence: 0.2,
            entities: json!({}),
        }))
    }
}

pub struct MockLlm {
    replies: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<LlmRequest>>,
    always_timeout: AtomicBool,
    pub call_count: AtomicU32,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            always_timeout: AtomicBool::new(false),
            call_count: AtomicU32::new(0),
        }
    }
}

impl MockLlm {
    pub fn push_reply(&self, content: &str) {
        self.replies.lock().push_back(content.to_string());
    }

    /// Every subsequent call fails with a timeout (scenario testing).
    pub fn fail_with_timeout(&self) {
        self.always_timeout.store(true, Ordering::SeqCst);
    }

    pub fn calls_made(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, req: LlmRequest) -> Result<LlmResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(req);
        if self.always_timeout.load(Ordering::SeqCst) {
            return Err(Error::Timeout {
                service: "llm:mock".into(),
            });
        }
        let content = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| "OK".to_string());
        Ok(LlmResponse {
            content,
            tokens_used: 8,
            provider_id: "mock".into(),
        })
    }
}

#[derive(Default)]
pub struct MockSearch {
    queued: Mutex<VecDeque<SearchResults>>,
    pub requests: Mutex<Vec<SearchRequest>>,
}

impl MockSearch {
    pub fn push_results(&self, results: SearchResults) {
        self.queued.lock().push_back(results);
    }
}

#[async_trait::async_trait]
impl SearchClient for MockSearch {
    async fn query(&self, req: SearchRequest) -> Result<SearchResults> {
        self.requests.lock().push(req);
        Ok(self.queued.lock().pop_front().unwrap_or(SearchResults {
            items: vec![],
            total: 0,
        }))
    }
}

pub struct MockRouting {
    estimate: Mutex<RouteEstimate>,
    pub calls: Mutex<Vec<(GeoPoint, GeoPoint)>>,
}

impl Default for MockRouting {
    fn default() -> Self {
        Self {
            estimate: Mutex::new(RouteEstimate {
                km: 3.2,
                duration_min: 10.0,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockRouting {
    pub fn set_estimate(&self, estimate: RouteEstimate) {
        *self.estimate.lock() = estimate;
    }
}

#[async_trait::async_trait]
impl RoutingClient for MockRouting {
    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteEstimate> {
        self.calls.lock().push((from, to));
        Ok(*self.estimate.lock())
    }
}

pub struct MockZone {
    queued: Mutex<VecDeque<ZoneInfo>>,
    default: Mutex<ZoneInfo>,
    pub calls: Mutex<Vec<(GeoPoint, String)>>,
}

impl Default for MockZone {
    fn default() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            default: Mutex::new(ZoneInfo {
                zone_id: Some("Z1".into()),
                serviceable: true,
                zone_name: Some("Central".into()),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockZone {
    /// Queue a one-shot reply; the default answers once drained.
    pub fn push_zone(&self, zone: ZoneInfo) {
        self.queued.lock().push_back(zone);
    }

    pub fn set_default(&self, zone: ZoneInfo) {
        *self.default.lock() = zone;
    }
}

#[async_trait::async_trait]
impl ZoneClient for MockZone {
    async fn zone_for(&self, point: GeoPoint, module: &str) -> Result<ZoneInfo> {
        self.calls.lock().push((point, module.to_string()));
        Ok(self
            .queued
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.lock().clone()))
    }
}

pub struct MockPricing {
    quote: Mutex<Quote>,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl Default for MockPricing {
    fn default() -> Self {
        Self {
            quote: Mutex::new(Quote {
                subtotal: 50.0,
                delivery: 10.0,
                tax: 0.0,
                total: 60.0,
                breakdown: json!({}),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockPricing {
    pub fn set_quote(&self, quote: Quote) {
        *self.quote.lock() = quote;
    }
}

#[async_trait::async_trait]
impl PricingClient for MockPricing {
    async fn quote(&self, order_type: &str, payload: Value) -> Result<Quote> {
        self.calls.lock().push((order_type.to_string(), payload));
        Ok(self.quote.lock().clone())
    }
}

#[derive(Default)]
pub struct MockOrder {
    by_key: Mutex<HashMap<String, OrderReceipt>>,
    /// Each entry is one real side effect (idempotent replays excluded).
    pub placed: Mutex<Vec<(Value, String)>>,
    next: AtomicU32,
    fail_kind: Mutex<Option<ErrorKind>>,
}

impl MockOrder {
    pub fn fail_with(&self, kind: ErrorKind) {
        *self.fail_kind.lock() = Some(kind);
    }

    pub fn placed_count(&self) -> usize {
        self.placed.lock().len()
    }
}

#[async_trait::async_trait]
impl OrderClient for MockOrder {
    async fn place(&self, payload: Value, idempotency_key: &str) -> Result<OrderReceipt> {
        if let Some(kind) = *self.fail_kind.lock() {
            return Err(Error::service("order", kind, "mock failure"));
        }
        if let Some(existing) = self.by_key.lock().get(idempotency_key) {
            return Ok(existing.clone());
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let receipt = OrderReceipt {
            order_id: format!("P-{}", 1000 + n),
            status: "confirmed".into(),
        };
        self.by_key
            .lock()
            .insert(idempotency_key.to_string(), receipt.clone());
        self.placed
            .lock()
            .push((payload, idempotency_key.to_string()));
        Ok(receipt)
    }
}

#[derive(Default)]
pub struct MockPlaces {
    hits: Mutex<Vec<PlaceHit>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockPlaces {
    pub fn set_hits(&self, hits: Vec<PlaceHit>) {
        *self.hits.lock() = hits;
    }
}

#[async_trait::async_trait]
impl PlacesClient for MockPlaces {
    async fn search(&self, query: &str, _city: Option<&str>) -> Result<Vec<PlaceHit>> {
        self.calls.lock().push(query.to_string());
        Ok(self.hits.lock().clone())
    }
}

#[derive(Default)]
pub struct MockBackend {
    responses: Mutex<HashMap<String, Value>>,
    errors: Mutex<HashMap<String, (ErrorKind, String)>>,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl MockBackend {
    pub fn respond(&self, action: &str, response: Value) {
        self.responses.lock().insert(action.to_string(), response);
    }

    pub fn fail(&self, action: &str, kind: ErrorKind, detail: &str) {
        self.errors
            .lock()
            .insert(action.to_string(), (kind, detail.to_string()));
    }
}

#[async_trait::async_trait]
impl BackendClient for MockBackend {
    async fn call(&self, action: &str, params: Value) -> Result<Value> {
        self.calls.lock().push((action.to_string(), params));
        if let Some((kind, detail)) = self.errors.lock().get(action) {
            return Err(Error::service("backend", *kind, detail.clone()));
        }
        self.responses
            .lock()
            .get(action)
            .cloned()
            .ok_or_else(|| Error::service("backend", ErrorKind::Upstream, format!("unknown action {action}")))
    }
}

#[derive(Default)]
pub struct MockAsr {
    transcript: Mutex<String>,
}

impl MockAsr {
    pub fn set_transcript(&self, text: &str) {
        *self.transcript.lock() = text.to_string();
    }
}

#[async_trait::async_trait]
impl AsrClient for MockAsr {
    async fn transcribe(&self, _media_url: &str) -> Result<String> {
        Ok(self.transcript.lock().clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bundled mock set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handles for programming each mock from a test.
#[derive(Clone)]
pub struct MockHandles {
    pub nlu: Arc<MockNlu>,
    pub llm: Arc<MockLlm>,
    pub search: Arc<MockSearch>,
    pub routing: Arc<MockRouting>,
    pub zone: Arc<MockZone>,
    pub pricing: Arc<MockPricing>,
    pub order: Arc<MockOrder>,
    pub places: Arc<MockPlaces>,
    pub backend: Arc<MockBackend>,
    pub asr: Arc<MockAsr>,
}

/// A full [`ServiceSet`] backed by programmable mocks.
pub fn mock_services() -> (ServiceSet, MockHandles) {
    let handles = MockHandles {
        nlu: Arc::new(MockNlu::default()),
        llm: Arc::new(MockLlm::default()),
        search: Arc::new(MockSearch::default()),
        routing: Arc::new(MockRouting::default()),
        zone: Arc::new(MockZone::default()),
        pricing: Arc::new(MockPricing::default()),
        order: Arc::new(MockOrder::default()),
        places: Arc::new(MockPlaces::default()),
        backend: Arc::new(MockBackend::default()),
        asr: Arc::new(MockAsr::default()),
    };
    let set = ServiceSet {
        nlu: handles.nlu.clone(),
        llm: handles.llm.clone(),
        search: handles.search.clone(),
        routing: handles.routing.clone(),
        zone: handles.zone.clone(),
        pricing: handles.pricing.clone(),
        order: handles.order.clone(),
        places: handles.places.clone(),
        backend: handles.backend.clone(),
        asr: handles.asr.clone(),
    };
    (set, handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn order_mock_is_idempotent_by_key() {
        let order = MockOrder::default();
        let first = order.place(json!({ "a": 1 }), "k1").await.unwrap();
        let second = order.place(json!({ "a": 1 }), "k1").await.unwrap();
        assert_eq!(first.order_id, second.order_id);
        assert_eq!(order.placed_count(), 1);

        let third = order.place(json!({ "a": 2 }), "k2").await.unwrap();
        assert_ne!(first.order_id, third.order_id);
        assert_eq!(order.placed_count(), 2);
    }

    #[tokio::test]
    async fn zone_mock_drains_queue_then_uses_default() {
        let zone = MockZone::default();
        zone.push_zone(ZoneInfo {
            zone_id: None,
            serviceable: false,
            zone_name: None,
        });
        let p = GeoPoint::new(1.0, 2.0);
        assert!(!zone.zone_for(p, "parcel").await.unwrap().serviceable);
        assert!(zone.zone_for(p, "parcel").await.unwrap().serviceable);
    }

    #[tokio::test]
    async fn unconfigured_reports_internal_error() {
        let stub = Unconfigured::new("search");
        let err = stub
            .query(SearchRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
