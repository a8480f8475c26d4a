//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.tether/config.json`) and
//! environment. Kept minimal: the relay has no tunables beyond where to
//! listen and where the optional static assets live.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Relay server settings.
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Relay bind, port, and static asset settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Port for HTTP and WebSocket (default 3000).
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; the secondary typically joins from
    /// another device on the LAN, and the session code is the only gate).
    #[serde(default = "default_relay_bind")]
    pub bind: String,

    /// Root directory for the static asset fallback. When unset, non-relay
    /// paths return 404.
    pub static_dir: Option<PathBuf>,
}

fn default_relay_port() -> u16 {
    3000
}

fn default_relay_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            bind: default_relay_bind(),
            static_dir: None,
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TETHER_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".tether").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or TETHER_CONFIG_PATH). Missing file =>
/// default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
