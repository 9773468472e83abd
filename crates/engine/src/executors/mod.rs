//! The concrete action handlers behind the executor registry.

mod address;
mod distance;
mod external_search;
mod llm;
mod nlu;
mod order;
mod php_api;
mod pricing;
mod response;
mod search;
mod selection;
mod zone;

pub use address::AddressExecutor;
pub use distance::DistanceExecutor;
pub use external_search::ExternalSearchExecutor;
pub use llm::LlmExecutor;
pub use nlu::NluExecutor;
pub use order::OrderExecutor;
pub use php_api::PhpApiExecutor;
pub use pricing::PricingExecutor;
pub use response::ResponseExecutor;
pub use search::SearchExecutor;
pub use selection::SelectionExecutor;
pub use zone::ZoneExecutor;

use std::sync::Arc;

use parking_lot::RwLock;

use pv_domain::config::Config;
use pv_services::ServiceSet;

use crate::executor::ExecutorRegistry;

/// The closed intent set the NLU fallback may choose from. Filled after
/// the flow catalog registers (triggers) — the executor registry and the
/// catalog reference each other, so this is wired in a second boot step.
pub type SharedIntents = Arc<RwLock<Vec<String>>>;

/// Conversational intents that exist regardless of registered flows.
pub const BASE_INTENTS: &[&str] = &[
    "greeting",
    "farewell",
    "chitchat",
    "feedback",
    "help",
    "unknown",
];

/// Build the full registry. Registration is closed once this returns.
pub fn build_registry(
    services: &ServiceSet,
    config: &Arc<Config>,
    intents: SharedIntents,
) -> pv_domain::Result<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(ResponseExecutor))?;
    registry.register(Arc::new(LlmExecutor::new(
        services.llm.clone(),
        config.clone(),
    )))?;
    registry.register(Arc::new(NluExecutor::new(
        services.nlu.clone(),
        services.llm.clone(),
        config.clone(),
        intents,
    )))?;
    registry.register(Arc::new(SearchExecutor::new(services.search.clone())))?;
    registry.register(Arc::new(AddressExecutor))?;
    registry.register(Arc::new(DistanceExecutor::new(services.routing.clone())))?;
    registry.register(Arc::new(ZoneExecutor::new(services.zone.clone())))?;
    registry.register(Arc::new(PricingExecutor::new(services.pricing.clone())))?;
    registry.register(Arc::new(OrderExecutor::new(services.order.clone())))?;
    registry.register(Arc::new(ExternalSearchExecutor::new(
        services.places.clone(),
    )))?;
    registry.register(Arc::new(SelectionExecutor))?;
    registry.register(Arc::new(PhpApiExecutor::new(services.backend.clone())))?;
    Ok(registry)
}
