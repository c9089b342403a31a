//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// The single upstream compute service.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Shutdown grace period and watchdog ceiling.
    pub shutdown: ShutdownConfig,

    /// Global per-client rate limit.
    pub rate_limit: RateLimitConfig,

    /// Stricter rate limit applied to the settings and system APIs.
    pub api_rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Security hardening.
    pub security: SecurityConfig,

    /// Where persisted settings and static assets live.
    pub storage: StorageConfig,

    /// System stats collection.
    pub system: SystemConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            upstream: UpstreamConfig::default(),
            timeouts: TimeoutConfig::default(),
            shutdown: ShutdownConfig::default(),
            rate_limit: RateLimitConfig::default(),
            api_rate_limit: RateLimitConfig::api_default(),
            observability: ObservabilityConfig::default(),
            security: SecurityConfig::default(),
            storage: StorageConfig::default(),
            system: SystemConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL for plain HTTP traffic (e.g., "http://127.0.0.1:8188").
    pub url: String,

    /// Base URL for WebSocket traffic. Derived from `url` when unset.
    pub ws_url: Option<String>,

    /// Client-facing path prefix that is stripped before forwarding.
    pub path_prefix: String,

    /// Client-facing WebSocket upgrade path.
    pub ws_path: String,

    /// Path of the upstream WebSocket endpoint, joined to `ws_url`.
    pub upstream_ws_path: String,

    /// Upstream WebSocket dial timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8188".to_string(),
            ws_url: None,
            path_prefix: "/comfyui".to_string(),
            ws_path: "/comfyui/ws".to_string(),
            upstream_ws_path: "/ws".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl UpstreamConfig {
    /// WebSocket base URL, either configured or derived from the HTTP URL.
    pub fn ws_base(&self) -> String {
        match &self.ws_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let base = self.url.trim_end_matches('/');
                if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{}", rest)
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{}", rest)
                } else {
                    base.to_string()
                }
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed until response headers are produced, in seconds.
    pub request_secs: u64,

    /// Ceiling for flushing one WebSocket close handshake, in seconds.
    pub close_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 300,
            close_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn close(&self) -> Duration {
        Duration::from_secs(self.close_secs)
    }
}

/// Shutdown sequencing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Wait after issuing closes so close frames can flush.
    pub grace_period_ms: u64,

    /// Hard ceiling for the whole sequence before a forced exit.
    pub watchdog_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1_000,
            watchdog_ms: 10_000,
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per client within one window.
    pub max_requests: u32,

    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_secs: 15 * 60,
        }
    }
}

impl RateLimitConfig {
    pub fn api_default() -> Self {
        Self {
            enabled: true,
            max_requests: 30,
            window_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Directory for daily warn/error log files; `None` disables them.
    pub log_dir: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "comfy_gateway=info,traffic=debug,tower_http=info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
            log_dir: Some("logs".to_string()),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security headers.
    pub enable_headers: bool,
    /// Maximum JSON body size accepted by the API, in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `settings.json`.
    pub data_dir: String,

    /// Optional directory of static UI assets served for unmatched routes.
    pub static_dir: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            static_dir: None,
        }
    }
}

/// System stats configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    /// How long a stats sample is served from cache, in milliseconds.
    pub stats_cache_ms: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self { stats_cache_ms: 2_000 }
    }
}
