use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flow loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// Directory of YAML flow files loaded at boot alongside the built-in
    /// flows. `None` disables the YAML path.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// In-memory flow cache TTL; the cache is also invalidated explicitly
    /// on admin updates.
    #[serde(default = "d_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            path: None,
            cache_ttl_seconds: d_cache_ttl(),
        }
    }
}

fn d_cache_ttl() -> u64 {
    300
}
