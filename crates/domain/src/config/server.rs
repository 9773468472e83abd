use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_8090")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Path the WebSocket chat endpoint is mounted on.
    #[serde(default = "d_ws_path")]
    pub ws_path: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Per-IP rate limiting. `None` disables it.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Env var holding the WhatsApp webhook HMAC app secret.
    #[serde(default = "d_wa_secret_env")]
    pub whatsapp_secret_env: String,
    /// Env var holding the Telegram webhook secret token.
    #[serde(default = "d_tg_secret_env")]
    pub telegram_secret_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8090,
            host: "127.0.0.1".into(),
            ws_path: d_ws_path(),
            cors: CorsConfig::default(),
            rate_limit: None,
            whatsapp_secret_env: d_wa_secret_env(),
            telegram_secret_env: d_tg_secret_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    /// Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8090() -> u16 {
    8090
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_ws_path() -> String {
    "/ws".into()
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:*".into(),
        "http://127.0.0.1:*".into(),
    ]
}
fn d_wa_secret_env() -> String {
    "PV_WHATSAPP_APP_SECRET".into()
}
fn d_tg_secret_env() -> String {
    "PV_TELEGRAM_SECRET_TOKEN".into()
}
