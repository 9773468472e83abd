//! Non-partner vendor fallback over the places API. Used by the food
//! flow when internal search comes back empty. A client failure here is
//! the `error` flow event — the flow decides how to apologize.

use std::sync::Arc;

use serde_json::{json, Value};

use pv_domain::ErrorKind;
use pv_services::PlacesClient;

use crate::executor::{ExecOutcome, Executor, TurnContext};

pub struct ExternalSearchExecutor {
    client: Arc<dyn PlacesClient>,
}

impl ExternalSearchExecutor {
    pub fn new(client: Arc<dyn PlacesClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Executor for ExternalSearchExecutor {
    fn name(&self) -> &'static str {
        "external_search"
    }

    async fn execute(&self, config: &Value, _ctx: &TurnContext) -> ExecOutcome {
        let Some(query) = config.get("query").and_then(Value::as_str) else {
            return ExecOutcome::fail(ErrorKind::Internal, "external_search needs 'query'");
        };
        let city = config
            .get("city")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty());

        match self.client.search(query, city).await {
            Ok(hits) if hits.is_empty() => ExecOutcome::ok()
                .with_output(json!({ "results": [] }))
                .with_event("not_found"),
            Ok(hits) => {
                let results: Vec<Value> = hits
                    .iter()
                    .map(|h| {
                        json!({
                            "name": h.name,
                            "address": h.address,
                            "lat": h.lat,
                            "lng": h.lng,
                            "maps_link": h.maps_link,
                        })
                    })
                    .collect();
                ExecOutcome::ok()
                    .with_output(json!({ "results": results }))
                    .with_event("found")
            }
            Err(e) => {
                tracing::warn!(error = %e, "places lookup failed");
                ExecOutcome::ok()
                    .with_output(json!({ "results": [] }))
                    .with_event("error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_util::turn_ctx;
    use pv_services::mock::MockPlaces;
    use pv_services::PlaceHit;

    #[tokio::test]
    async fn hits_emit_found_with_maps_links() {
        let places = Arc::new(MockPlaces::default());
        places.set_hits(vec![PlaceHit {
            name: "Hotel Tushar Misal".into(),
            address: "College Road, Nashik".into(),
            lat: 19.99,
            lng: 73.77,
            maps_link: "https://maps.example/x".into(),
        }]);

        let outcome = ExternalSearchExecutor::new(places)
            .execute(&json!({ "query": "tushar misal" }), &turn_ctx(json!({})))
            .await;

        assert_eq!(outcome.events, vec!["found"]);
        let results = outcome.output.unwrap();
        assert_eq!(results["results"][0]["name"], json!("Hotel Tushar Misal"));
    }

    #[tokio::test]
    async fn empty_hits_emit_not_found() {
        let places = Arc::new(MockPlaces::default());
        let outcome = ExternalSearchExecutor::new(places)
            .execute(&json!({ "query": "xyzzy" }), &turn_ctx(json!({})))
            .await;
        assert_eq!(outcome.events, vec!["not_found"]);
    }
}
