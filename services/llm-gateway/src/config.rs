//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys come from the environment only (`OPENROUTER_API_KEY`, then
//! `OPENROUTER_API_KEY_1` through `OPENROUTER_API_KEY_9`) and are never read
//! from the TOML file, so the file can be committed without leaking secrets.
//! Scheduler tunables (retries, backoff, cooldowns, model chain) are
//! compiled in and deliberately not configurable here.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Primary API key variable.
const PRIMARY_KEY_VAR: &str = "OPENROUTER_API_KEY";

/// Number of numbered extra key variables (`OPENROUTER_API_KEY_1..=9`).
const EXTRA_KEY_SLOTS: usize = 9;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Loaded from the environment, in pool order.
    #[serde(skip)]
    pub api_keys: Vec<Secret<String>>,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Admin API (key status, reset). Keep it off public interfaces.
    #[serde(default = "default_admin_addr")]
    pub admin_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Upstream provider settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_max_connections() -> usize {
    1000
}

fn default_base_url() -> String {
    provider::openrouter::DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Config {
    /// Load configuration from a TOML file, then overlay API keys from the
    /// environment. Fails if no key is configured: a gateway without keys
    /// can never serve a request.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.upstream.base_url.starts_with("http://")
            && !config.upstream.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.upstream.base_url
            )));
        }

        if config.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        config.api_keys = api_keys_from_env();
        if config.api_keys.is_empty() {
            return Err(common::Error::Config(format!(
                "no OpenRouter API key found, set {PRIMARY_KEY_VAR} (and optionally {PRIMARY_KEY_VAR}_1..{PRIMARY_KEY_VAR}_{EXTRA_KEY_SLOTS})"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("llm-gateway.toml")
    }
}

/// Collect API keys in pool order: the primary variable first, then the
/// numbered slots. Unset and blank variables are skipped.
fn api_keys_from_env() -> Vec<Secret<String>> {
    std::iter::once(PRIMARY_KEY_VAR.to_string())
        .chain((1..=EXTRA_KEY_SLOTS).map(|i| format!("{PRIMARY_KEY_VAR}_{i}")))
        .filter_map(|var| std::env::var(var).ok())
        .map(|key| key.trim().to_owned())
        .filter(|key| !key.is_empty())
        .map(Secret::new)
        .collect()
}
