use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Remote service endpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One remote RPC endpoint. Credentials come from the named env var so
/// secrets never live in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceEndpoint {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Per-service HTTP timeout override (ms).
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ServiceEndpoint {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub nlu: ServiceEndpoint,
    #[serde(default)]
    pub search: ServiceEndpoint,
    #[serde(default)]
    pub routing: ServiceEndpoint,
    #[serde(default)]
    pub zone: ServiceEndpoint,
    #[serde(default)]
    pub pricing: ServiceEndpoint,
    #[serde(default)]
    pub order: ServiceEndpoint,
    /// The PHP business backend (auth, order status, vendor actions).
    #[serde(default)]
    pub backend: ServiceEndpoint,
    /// Places API used for non-partner vendor fallback search.
    #[serde(default)]
    pub places: ServiceEndpoint,
    /// Speech-to-text for audio attachments.
    #[serde(default)]
    pub asr: ServiceEndpoint,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider chain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One LLM provider in the fallback chain. The chain is tried strictly in
/// config order; the first non-error response wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Stable identifier used in logs and traces.
    pub id: String,
    /// OpenAI-compatible chat completions endpoint.
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "d_provider_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ordered fallback chain. Order is configuration, never code.
    #[serde(default)]
    pub providers: Vec<LlmProviderConfig>,
    /// Per-turn cap across all llm executor invocations.
    #[serde(default = "d_max_tokens_per_turn")]
    pub max_tokens_per_turn: u32,
    /// Default max_tokens for a single generation when the action config
    /// does not specify one.
    #[serde(default = "d_default_max_tokens")]
    pub default_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            max_tokens_per_turn: d_max_tokens_per_turn(),
            default_max_tokens: d_default_max_tokens(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_provider_timeout() -> u64 {
    30_000
}
fn d_max_tokens_per_turn() -> u32 {
    4_096
}
fn d_default_max_tokens() -> u32 {
    512
}
