//! Engine configuration model.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration of the session engine (`config.toml`).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the dashboard REST API, e.g. `https://admin.example.com/api`.
    pub api_base_url: String,
    /// URL of the streaming channel.
    pub ws_url: String,
    /// Bearer token attached to REST calls and the channel handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// `tracing` filter directive used when `COCKPIT_LOG` is unset.
    pub log_filter: String,
    pub transport: TransportConfig,
    pub typing: TypingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            ws_url: "ws://localhost:5000/assistant".to_string(),
            auth_token: None,
            log_filter: "info".to_string(),
            transport: TransportConfig::default(),
            typing: TypingConfig::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// How long a send waits for its acknowledgement.
    pub ack_timeout_ms: u64,
    /// Timeout of a single request/response call.
    pub request_timeout_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// Fraction of random jitter added to each reconnect delay (0.0-1.0).
    pub reconnect_jitter: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
            reconnect_jitter: 0.2,
        }
    }
}

impl TransportConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TypingConfig {
    /// Idle delay after the last keystroke before "stopped typing" is sent.
    pub idle_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self { idle_ms: 1_000 }
    }
}

impl TypingConfig {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}
