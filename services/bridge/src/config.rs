//! Bridge service configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides, in
//! the same spirit as the forwarder's config loader. Default config path:
//! `/etc/hb-bridge/bridge.toml`.

use hb_bridge::{Config as BridgeConfig, LineEnding, ServerTarget};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: String,
    pub whitelist_path: Option<String>,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    bind: Option<String>,
    whitelist_path: Option<String>,
    servers: Option<Vec<RawServerTarget>>,
    handshake: Option<String>,
    line_ending: Option<String>,
    min_gap_ms: Option<u64>,
    min_poll_interval_ms: Option<u64>,
    push_fresh_ms: Option<u64>,
    handshake_retry_ms: Option<u64>,
    hb_whitelist_strict: Option<bool>,
    default_load_fade_seconds: Option<u32>,
    load_awaiters_max_per_key: Option<usize>,
    awaiters_max_per_key: Option<usize>,
    auto_connect: Option<bool>,
    auto_connect_index: Option<usize>,
    auto_connect_retry_ms: Option<u64>,
    debounce_ms: Option<u64>,
    recv_ring_max: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawServerTarget {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

/// Load from the default path `/etc/hb-bridge/bridge.toml`.
pub fn load_config() -> Result<ServiceConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/hb-bridge/bridge.toml"))
}

pub fn load_config_from_path(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<ServiceConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let defaults = BridgeConfig::default();

    let mut servers = Vec::new();
    for (i, s) in raw.servers.unwrap_or_default().into_iter().enumerate() {
        let name = s
            .name
            .ok_or_else(|| ConfigError::MissingField(format!("servers[{i}].name")))?;
        let host = s
            .host
            .ok_or_else(|| ConfigError::MissingField(format!("servers[{i}].host")))?;
        let port = s
            .port
            .ok_or_else(|| ConfigError::MissingField(format!("servers[{i}].port")))?;
        servers.push(ServerTarget { name, host, port });
    }

    let line_ending = match raw.line_ending.as_deref() {
        None => defaults.line_ending,
        Some("crlf" | "CRLF") => LineEnding::CrLf,
        Some("cr" | "CR") => LineEnding::Cr,
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "line_ending must be \"crlf\" or \"cr\", got \"{other}\""
            )))
        }
    };

    let bridge = BridgeConfig {
        servers,
        handshake: raw.handshake.unwrap_or(defaults.handshake),
        line_ending,
        min_gap_ms: raw.min_gap_ms.unwrap_or(defaults.min_gap_ms),
        min_poll_interval_ms: raw
            .min_poll_interval_ms
            .unwrap_or(defaults.min_poll_interval_ms),
        push_fresh_ms: raw.push_fresh_ms.unwrap_or(defaults.push_fresh_ms),
        handshake_retry_ms: raw
            .handshake_retry_ms
            .unwrap_or(defaults.handshake_retry_ms),
        hb_whitelist_strict: raw
            .hb_whitelist_strict
            .unwrap_or(defaults.hb_whitelist_strict),
        default_load_fade_seconds: raw
            .default_load_fade_seconds
            .unwrap_or(defaults.default_load_fade_seconds),
        load_awaiters_max_per_key: raw
            .load_awaiters_max_per_key
            .unwrap_or(defaults.load_awaiters_max_per_key),
        awaiters_max_per_key: raw
            .awaiters_max_per_key
            .unwrap_or(defaults.awaiters_max_per_key),
        auto_connect: raw.auto_connect.unwrap_or(defaults.auto_connect),
        auto_connect_index: raw
            .auto_connect_index
            .unwrap_or(defaults.auto_connect_index),
        auto_connect_retry_ms: raw
            .auto_connect_retry_ms
            .unwrap_or(defaults.auto_connect_retry_ms),
        debounce_ms: raw.debounce_ms.unwrap_or(defaults.debounce_ms),
        recv_ring_max: raw.recv_ring_max.unwrap_or(defaults.recv_ring_max),
    };

    Ok(ServiceConfig {
        bind: raw.bind.unwrap_or_else(|| "127.0.0.1:8080".to_owned()),
        whitelist_path: raw.whitelist_path,
        bridge,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}
