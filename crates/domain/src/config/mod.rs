mod engine;
mod flows;
mod server;
mod services;
mod store;

pub use engine::*;
pub use flows::*;
pub use server::*;
pub use services::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub nlu: NluConfig,
    #[serde(default)]
    pub router: RouterConfig,
    /// Per-executor overrides (key = executor name).
    #[serde(default)]
    pub executors: HashMap<String, ExecutorOverride>,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub flows: FlowsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if let Some(rate_limit) = &self.server.rate_limit {
            if rate_limit.requests_per_second == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "must be greater than 0".into(),
                });
            }
            if rate_limit.burst_size == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "must be greater than 0".into(),
                });
            }
        }

        if self.engine.auto_advance_max == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "engine.auto_advance_max".into(),
                message: "must be at least 1".into(),
            });
        }

        if self.engine.turn_budget_ms < 1_000 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "engine.turn_budget_ms".into(),
                message: "turn budget below 1s will fail most LLM turns".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.nlu.confidence_threshold) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "nlu.confidence_threshold".into(),
                message: "must be within 0.0..=1.0".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.router.trigger_threshold) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "router.trigger_threshold".into(),
                message: "must be within 0.0..=1.0".into(),
            });
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured — llm and clarification fall back to canned replies".into(),
            });
        }

        if self.store.session_ttl_seconds > self.store.session_absolute_ttl_seconds {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "store.session_ttl_seconds".into(),
                message: "idle TTL must not exceed the absolute TTL".into(),
            });
        }

        errors
    }

    /// Resolve the timeout for a named executor, falling back to the
    /// per-kind defaults (llm 30s, nlu 3s, everything else 10s).
    pub fn executor_timeout_ms(&self, executor: &str) -> u64 {
        if let Some(o) = self.executors.get(executor) {
            if let Some(t) = o.timeout_ms {
                return t;
            }
        }
        match executor {
            "llm" => 30_000,
            "nlu" => 3_000,
            _ => 10_000,
        }
    }

    /// Resolve the retry count for a named executor (default 0).
    pub fn executor_retries(&self, executor: &str) -> u32 {
        self.executors
            .get(executor)
            .and_then(|o| o.retries)
            .unwrap_or(0)
    }
}

/// Per-executor timeout / retry overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutorOverride {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
}
