//! Product / store index search and the places-API fallback.

use serde_json::{json, Value};

use pv_domain::config::ServiceEndpoint;
use pv_domain::{Error, ErrorKind, Result};

use crate::http::HttpService;
use crate::traits::{PlaceHit, PlacesClient, SearchClient, SearchRequest, SearchResults};

pub struct HttpSearchClient {
    http: HttpService,
}

impl HttpSearchClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        Self {
            http: HttpService::new("search", endpoint),
        }
    }
}

#[async_trait::async_trait]
impl SearchClient for HttpSearchClient {
    async fn query(&self, req: SearchRequest) -> Result<SearchResults> {
        let mut body = json!({
            "module": req.module,
            "q": req.query,
            "filters": req.filters,
            "size": req.size,
        });
        if let Some(zone_id) = &req.zone_id {
            body["zone_id"] = json!(zone_id);
        }
        if let Some(geo) = req.geo {
            body["geo"] = json!({ "lat": geo.lat, "lng": geo.lng });
        }

        let response = self.http.post_json("/search", &body).await?;
        serde_json::from_value(response).map_err(|e| {
            Error::service("search", ErrorKind::Upstream, format!("bad payload: {e}"))
        })
    }
}

pub struct HttpPlacesClient {
    http: HttpService,
}

impl HttpPlacesClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        Self {
            http: HttpService::new("places", endpoint),
        }
    }
}

#[async_trait::async_trait]
impl PlacesClient for HttpPlacesClient {
    async fn search(&self, query: &str, city: Option<&str>) -> Result<Vec<PlaceHit>> {
        let mut params = vec![("q", query.to_string())];
        if let Some(city) = city {
            params.push(("city", city.to_string()));
        }
        let response = self.http.get_json("/places/search", &params).await?;
        let hits = response
            .get("results")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(hits).map_err(|e| {
            Error::service("places", ErrorKind::Upstream, format!("bad payload: {e}"))
        })
    }
}
