// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Live session configuration.
//!
//! Stored as TOML. Every field is optional; missing fields take the defaults
//! below. The server URL defaults to `PNR_LIVE_URL` from the environment and
//! falls back to [`DEFAULT_URL`].
//!
//! ```toml
//! url = "wss://live.example.com/socket"
//! max_reconnect_attempts = 5
//! update_timeout_ms = 8000
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use pnr_core::BackoffPolicy;

use crate::connection::ConnectionConfig;
use crate::env;
use crate::error::{Error, Result};
use crate::tracker::TrackerConfig;

/// Server URL used when neither the config file nor the environment names one.
pub const DEFAULT_URL: &str = "ws://localhost:3001";

/// Configuration for a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// WebSocket URL of the realtime server (`ws://` or `wss://`).
    #[serde(default = "default_url")]
    pub url: String,
    /// Max time to wait for the transport handshake, in milliseconds (default: 20000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Reconnection attempts before giving up (default: 10).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// First reconnection delay in milliseconds (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Ceiling for reconnection delays in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// How long an optimistic update waits for confirmation, in milliseconds (default: 10000).
    #[serde(default = "default_update_timeout_ms")]
    pub update_timeout_ms: u64,
    /// Automatic retries per optimistic update (default: 3).
    #[serde(default = "default_update_max_retries")]
    pub update_max_retries: u32,
    /// First update retry delay in milliseconds (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Ceiling for update retry delays in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_url() -> String {
    env::live_url().unwrap_or_else(|| DEFAULT_URL.to_string())
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_update_timeout_ms() -> u64 {
    10_000
}

fn default_update_max_retries() -> u32 {
    3
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            url: default_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_base_delay_ms(),
            reconnect_max_delay_ms: default_max_delay_ms(),
            update_timeout_ms: default_update_timeout_ms(),
            update_max_retries: default_update_max_retries(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl LiveConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Loads the file named by `PNR_LIVE_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match env::config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Saves configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Returns a copy pointing at another server.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Checks that the URL is a WebSocket URL and the timeouts are usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "invalid server URL '{}': must start with ws:// or wss://",
                self.url
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::Config("connect_timeout_ms must be greater than 0".into()));
        }
        if self.update_timeout_ms == 0 {
            return Err(Error::Config("update_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }

    /// Connection manager settings.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            backoff: BackoffPolicy::from_millis(
                self.reconnect_base_delay_ms,
                self.reconnect_max_delay_ms,
            ),
        }
    }

    /// Optimistic update tracker settings.
    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            update_timeout: Duration::from_millis(self.update_timeout_ms),
            max_retries: self.update_max_retries,
            backoff: BackoffPolicy::from_millis(self.retry_base_delay_ms, self.retry_max_delay_ms),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
