//! Recognized bridge configuration options and their defaults.
//!
//! This module owns the canonical `Config` type and its defaults; TOML
//! parsing into this shape lives in the `bridge` service binary, which
//! deserializes into an `Option`-heavy raw shape and then fills defaults.

use serde::Serialize;
use std::time::Duration;

/// A single configured controller target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerTarget {
    pub name: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub servers: Vec<ServerTarget>,
    pub handshake: String,
    pub line_ending: LineEnding,
    pub min_gap_ms: u64,
    pub min_poll_interval_ms: u64,
    pub push_fresh_ms: u64,
    pub handshake_retry_ms: u64,
    pub hb_whitelist_strict: bool,
    pub default_load_fade_seconds: u32,
    pub load_awaiters_max_per_key: usize,
    pub awaiters_max_per_key: usize,
    pub auto_connect: bool,
    pub auto_connect_index: usize,
    pub auto_connect_retry_ms: u64,
    pub debounce_ms: u64,
    pub recv_ring_max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    CrLf,
    Cr,
}

impl LineEnding {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::CrLf => b"\r\n",
            LineEnding::Cr => b"\r",
        }
    }
}

impl Config {
    pub fn min_gap(&self) -> Duration {
        Duration::from_millis(self.min_gap_ms)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    pub fn push_fresh(&self) -> Duration {
        Duration::from_millis(self.push_fresh_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn auto_connect_target(&self) -> Option<&ServerTarget> {
        self.servers.get(self.auto_connect_index)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            servers: Vec::new(),
            handshake: "VCL 1 0\r\n".to_owned(),
            line_ending: LineEnding::CrLf,
            min_gap_ms: 120,
            min_poll_interval_ms: 400,
            push_fresh_ms: 10_000,
            handshake_retry_ms: 0,
            hb_whitelist_strict: true,
            default_load_fade_seconds: 3,
            load_awaiters_max_per_key: 200,
            awaiters_max_per_key: 200,
            auto_connect: true,
            auto_connect_index: 0,
            auto_connect_retry_ms: 5_000,
            debounce_ms: 250,
            recv_ring_max: 32_768,
        }
    }
}
