//! Narrow client interfaces for every remote service the engine calls.
//!
//! The core treats NLU, LLM, search, routing, zones, pricing, orders,
//! the places API, the business backend, and ASR as remote RPCs behind
//! these traits. Every call returns either a success payload or a
//! classified [`pv_domain::Error`]; retries happen above this layer.

pub mod backend;
pub mod http;
pub mod llm;
pub mod mock;
pub mod nlu;
pub mod search;
pub mod traits;

mod commerce;
mod geo;

pub use commerce::{HttpOrderClient, HttpPricingClient};
pub use geo::{HttpRoutingClient, HttpZoneClient};
pub use traits::*;

use std::sync::Arc;

use pv_domain::config::Config;

/// Every remote dependency, bundled for wiring.
#[derive(Clone)]
pub struct ServiceSet {
    pub nlu: Arc<dyn NluClient>,
    pub llm: Arc<dyn LlmClient>,
    pub search: Arc<dyn SearchClient>,
    pub routing: Arc<dyn RoutingClient>,
    pub zone: Arc<dyn ZoneClient>,
    pub pricing: Arc<dyn PricingClient>,
    pub order: Arc<dyn OrderClient>,
    pub places: Arc<dyn PlacesClient>,
    pub backend: Arc<dyn BackendClient>,
    pub asr: Arc<dyn AsrClient>,
}

impl ServiceSet {
    /// Build HTTP clients for configured endpoints; anything without a
    /// URL gets a stub that reports itself unconfigured.
    pub fn from_config(config: &Config) -> Self {
        let services = &config.services;
        Self {
            nlu: if services.nlu.is_configured() {
                Arc::new(nlu::HttpNluClient::new(&services.nlu))
            } else {
                Arc::new(mock::Unconfigured::new("nlu"))
            },
            llm: if config.llm.providers.is_empty() {
                Arc::new(mock::Unconfigured::new("llm"))
            } else {
                Arc::new(llm::HttpLlmChain::new(&config.llm))
            },
            search: if services.search.is_configured() {
                Arc::new(search::HttpSearchClient::new(&services.search))
            } else {
                Arc::new(mock::Unconfigured::new("search"))
            },
            routing: if services.routing.is_configured() {
                Arc::new(HttpRoutingClient::new(&services.routing))
            } else {
                Arc::new(mock::Unconfigured::new("routing"))
            },
            zone: if services.zone.is_configured() {
                Arc::new(HttpZoneClient::new(&services.zone))
            } else {
                Arc::new(mock::Unconfigured::new("zone"))
            },
            pricing: if services.pricing.is_configured() {
                Arc::new(HttpPricingClient::new(&services.pricing))
            } else {
                Arc::new(mock::Unconfigured::new("pricing"))
            },
            order: if services.order.is_configured() {
                Arc::new(HttpOrderClient::new(&services.order))
            } else {
                Arc::new(mock::Unconfigured::new("order"))
            },
            places: if services.places.is_configured() {
                Arc::new(search::HttpPlacesClient::new(&services.places))
            } else {
                Arc::new(mock::Unconfigured::new("places"))
            },
            backend: if services.backend.is_configured() {
                Arc::new(backend::HttpBackendClient::new(&services.backend))
            } else {
                Arc::new(mock::Unconfigured::new("backend"))
            },
            asr: if services.asr.is_configured() {
                Arc::new(backend::HttpAsrClient::new(&services.asr))
            } else {
                Arc::new(mock::Unconfigured::new("asr"))
            },
        }
    }
}
