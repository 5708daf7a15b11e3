//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener configuration.
    pub listener: ListenerConfig,

    /// Search-engine cluster the gateway talks to.
    pub backend: BackendConfig,

    /// HTTP command adapter settings.
    pub http: HttpConfig,

    /// Response cache rules.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Backend cluster configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Tag prefix; envelopes travel as `<tag>.message`.
    pub tag: String,

    /// Host the reply receivers bind to and advertise in `replyTo`.
    pub receive_host: String,

    /// Fixed first reply port. Each further target uses the next port.
    /// Unset means ephemeral ports.
    pub receive_port: Option<u16>,

    /// Backend engines, dispatched round-robin.
    pub targets: Vec<BackendTarget>,

    /// Reply timeout for HTTP commands in milliseconds (<= 0 waits forever).
    pub default_timeout_ms: i64,

    /// TCP connect timeout towards a backend in milliseconds.
    pub connect_timeout_ms: u64,

    /// Deadline for writing one packet in milliseconds. A backend that stops
    /// reading loses its connection when it passes.
    pub write_timeout_ms: u64,
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            tag: "droonga".to_string(),
            receive_host: "127.0.0.1".to_string(),
            receive_port: None,
            targets: vec![BackendTarget::default()],
            default_timeout_ms: 1000,
            connect_timeout_ms: 3000,
            write_timeout_ms: 5000,
        }
    }
}

/// One backend engine address.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendTarget {
    pub host: String,
    pub port: u16,
}

impl BackendTarget {
    /// `host:port` form used to connect.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BackendTarget {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 24224,
        }
    }
}

/// HTTP command adapter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Path prefix for the command routes (e.g., "/api"). Empty mounts at root.
    pub prefix: String,

    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Ordered rules; the first match wins.
    pub rules: Vec<CacheRuleConfig>,

    /// Responses with larger bodies are never stored.
    pub max_body_bytes: usize,

    /// Interval of the expired-entry sweep in seconds (0 disables it).
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            max_body_bytes: 1024 * 1024, // 1MB
            sweep_interval_secs: 60,
        }
    }
}

/// A single cache rule.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CacheRuleConfig {
    /// Regular expression matched against the request path.
    pub pattern: Option<String>,

    /// Entry lifetime in milliseconds (0 = never expires).
    #[serde(default)]
    pub ttl_ms: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
