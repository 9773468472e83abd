//! Command-line interface and config loading.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pv_domain::config::Config;

#[derive(Parser)]
#[command(name = "palaver", about = "Multi-channel conversational orchestrator")]
pub struct Cli {
    /// Path to the TOML config file (also via PALAVER_CONFIG).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway (default).
    Serve,
    /// Config inspection.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and exit non-zero on errors.
    Validate,
    /// Print the effective config (defaults applied).
    Show,
}

/// Load the config: `--config`, then `PALAVER_CONFIG`, then
/// `./palaver.toml`; a missing file falls back to defaults with a
/// warning.
pub fn load_config(explicit: Option<&PathBuf>) -> anyhow::Result<(Config, PathBuf)> {
    let path = explicit
        .cloned()
        .or_else(|| std::env::var("PALAVER_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("palaver.toml"));

    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
    Ok((config, path))
}

/// Pretty-print validation issues; returns false when any is an error.
pub fn validate(config: &Config, path: &std::path::Path) -> bool {
    use pv_domain::config::ConfigSeverity;

    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("cannot render config: {e}"),
    }
}
