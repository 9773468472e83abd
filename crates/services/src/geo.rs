//! Routing (distance/duration) and serviceable-zone lookups.

use serde_json::json;

use pv_domain::config::ServiceEndpoint;
use pv_domain::geo::GeoPoint;
use pv_domain::{Error, ErrorKind, Result};

use crate::http::HttpService;
use crate::traits::{RouteEstimate, RoutingClient, ZoneClient, ZoneInfo};

pub struct HttpRoutingClient {
    http: HttpService,
}

impl HttpRoutingClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        Self {
            http: HttpService::new("routing", endpoint),
        }
    }
}

#[async_trait::async_trait]
impl RoutingClient for HttpRoutingClient {
    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteEstimate> {
        let body = json!({
            "from": { "lat": from.lat, "lng": from.lng },
            "to": { "lat": to.lat, "lng": to.lng },
        });
        let response = self.http.post_json("/route", &body).await?;
        serde_json::from_value(response).map_err(|e| {
            Error::service("routing", ErrorKind::Upstream, format!("bad payload: {e}"))
        })
    }
}

pub struct HttpZoneClient {
    http: HttpService,
}

impl HttpZoneClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        Self {
            http: HttpService::new("zone", endpoint),
        }
    }
}

#[async_trait::async_trait]
impl ZoneClient for HttpZoneClient {
    async fn zone_for(&self, point: GeoPoint, module: &str) -> Result<ZoneInfo> {
        let body = json!({
            "lat": point.lat,
            "lng": point.lng,
            "module": module,
        });
        let response = self.http.post_json("/zone", &body).await?;
        serde_json::from_value(response)
            .map_err(|e| Error::service("zone", ErrorKind::Upstream, format!("bad payload: {e}")))
    }
}
