use serde::{Deserialize, Serialize};

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Round to 5 decimal places (~1 m). Used as a cache key so nearby
    /// requests hit the same routing result.
    pub fn rounded(&self) -> (i64, i64) {
        (
            (self.lat * 100_000.0).round() as i64,
            (self.lng * 100_000.0).round() as i64,
        )
    }
}
