use pv_domain::config::{Config, ConfigSeverity};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn default_config_has_no_errors() {
    let config = Config::default();
    let errors = config.validate();
    assert!(
        errors
            .iter()
            .all(|e| e.severity != ConfigSeverity::Error),
        "default config must validate clean: {errors:?}"
    );
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8090
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn documented_defaults_match() {
    let config = Config::default();
    assert_eq!(config.store.session_ttl_seconds, 3_600);
    assert_eq!(config.store.auth_ttl_seconds, 604_800);
    assert_eq!(config.engine.auto_advance_max, 25);
    assert_eq!(config.engine.turn_budget_ms, 45_000);
    assert_eq!(config.engine.dedup_window_ms, 5_000);
    assert_eq!(config.engine.per_session_lock_wait_ms, 10_000);
    assert_eq!(config.nlu.confidence_threshold, 0.65);
    assert_eq!(config.router.trigger_threshold, 0.6);
}

#[test]
fn executor_timeouts_fall_back_per_kind() {
    let config = Config::default();
    assert_eq!(config.executor_timeout_ms("llm"), 30_000);
    assert_eq!(config.executor_timeout_ms("nlu"), 3_000);
    assert_eq!(config.executor_timeout_ms("pricing"), 10_000);
}

#[test]
fn executor_override_wins() {
    let toml_str = r#"
[executors.llm]
timeout_ms = 5000
retries = 2
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.executor_timeout_ms("llm"), 5_000);
    assert_eq!(config.executor_retries("llm"), 2);
    assert_eq!(config.executor_retries("nlu"), 0);
}

#[test]
fn zero_rate_limit_values_flag_errors() {
    let toml_str = r#"
[server.rate_limit]
requests_per_second = 0
burst_size = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.severity == ConfigSeverity::Error
        && e.field == "server.rate_limit.requests_per_second"));
    assert!(errors.iter().any(|e| e.severity == ConfigSeverity::Error
        && e.field == "server.rate_limit.burst_size"));

    // A sane rate limit validates clean.
    let toml_str = r#"
[server.rate_limit]
requests_per_second = 20
burst_size = 40
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(!config
        .validate()
        .iter()
        .any(|e| e.field.starts_with("server.rate_limit")));
}

#[test]
fn inverted_session_ttls_flag_an_error() {
    let toml_str = r#"
[store]
session_ttl_seconds = 100000
session_absolute_ttl_seconds = 60
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config
        .validate()
        .iter()
        .any(|e| e.severity == ConfigSeverity::Error && e.field == "store.session_ttl_seconds"));
}

#[test]
fn keyword_fallbacks_cover_the_well_known_set() {
    let config = Config::default();
    for kw in ["parcel", "food", "shop", "track"] {
        assert!(config.router.keywords.contains_key(kw), "missing {kw}");
    }
}
