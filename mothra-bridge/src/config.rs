//! Load bridge config from file and environment.

use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;

/// Bridge configuration. File: $MOTHRA_BRIDGE_CONFIG, ~/.config/mothra/bridge.toml or /etc/mothra/bridge.toml.
/// Env overrides: MOTHRA_LISTENER_CLASS, MOTHRA_LOG.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Host class holding the listener methods, in VM internal form (default p2p/mothra/Mothra).
    #[serde(default = "default_listener_class")]
    pub listener_class: String,
    /// tracing filter used when RUST_LOG is unset (default "info").
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_listener_class() -> String {
    "p2p/mothra/Mothra".into()
}
fn default_log_filter() -> String {
    "info".into()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listener_class: default_listener_class(),
            log_filter: default_log_filter(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("invalid bridge config")
    }

    fn apply_env(&mut self) {
        if let Ok(s) = std::env::var("MOTHRA_LISTENER_CLASS") {
            if !s.is_empty() {
                self.listener_class = s;
            }
        }
        if let Ok(s) = std::env::var("MOTHRA_LOG") {
            if !s.is_empty() {
                self.log_filter = s;
            }
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> BridgeConfig {
    let mut c = match load_file() {
        Ok(Some(c)) => c,
        Ok(None) => BridgeConfig::default(),
        Err(e) => {
            tracing::warn!(error = ?e, "ignoring bridge config file");
            BridgeConfig::default()
        }
    };
    c.apply_env();
    c
}

fn config_paths() -> Vec<PathBuf> {
    if let Some(p) = std::env::var_os("MOTHRA_BRIDGE_CONFIG") {
        return vec![PathBuf::from(p)];
    }
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/mothra/bridge.toml"));
    }
    out.push(PathBuf::from("/etc/mothra/bridge.toml"));
    out
}

fn load_file() -> anyhow::Result<Option<BridgeConfig>> {
    for p in config_paths() {
        if p.exists() {
            let s = std::fs::read_to_string(&p)
                .with_context(|| format!("reading {}", p.display()))?;
            let c = BridgeConfig::from_toml(&s).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(Some(c));
        }
    }
    Ok(None)
}
