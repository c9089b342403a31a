//! Configuration validation.
//!
//! Serde handles the syntax; this module checks that values make sense
//! together. Every problem is reported, not just the first one.

use std::fmt;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::{GatewayConfig, RateLimitConfig};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than zero",
        ));
    }

    check_url(&mut errors, "upstream.url", &config.upstream.url, "http");
    check_url(&mut errors, "upstream.ws_url", &config.upstream.ws_base(), "ws");

    let upstream = &config.upstream;
    if !upstream.path_prefix.starts_with('/') || upstream.path_prefix.len() < 2 {
        errors.push(ValidationError::new(
            "upstream.path_prefix",
            "must start with '/' and name a path segment",
        ));
    } else if upstream.path_prefix.ends_with('/') {
        errors.push(ValidationError::new(
            "upstream.path_prefix",
            "must not end with '/'",
        ));
    }
    if upstream.path_prefix == "/api" || upstream.path_prefix.starts_with("/api/") {
        errors.push(ValidationError::new(
            "upstream.path_prefix",
            "conflicts with the gateway's own /api routes",
        ));
    }
    if !upstream.ws_path.starts_with('/') {
        errors.push(ValidationError::new("upstream.ws_path", "must start with '/'"));
    }
    if !upstream.upstream_ws_path.starts_with('/') {
        errors.push(ValidationError::new(
            "upstream.upstream_ws_path",
            "must start with '/'",
        ));
    }
    if upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "upstream.connect_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            "must be greater than zero",
        ));
    }
    if config.timeouts.close_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.close_secs",
            "must be greater than zero",
        ));
    }

    if config.shutdown.watchdog_ms <= config.shutdown.grace_period_ms {
        errors.push(ValidationError::new(
            "shutdown.watchdog_ms",
            "must exceed shutdown.grace_period_ms",
        ));
    }

    check_rate_limit(&mut errors, "rate_limit", &config.rate_limit);
    check_rate_limit(&mut errors, "api_rate_limit", &config.api_rate_limit);

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}', expected 'pretty' or 'json'", other),
        )),
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if matches!(config.observability.log_dir.as_deref(), Some(dir) if dir.trim().is_empty()) {
        errors.push(ValidationError::new(
            "observability.log_dir",
            "must not be empty; omit it to disable log files",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// TLS is not terminated towards the upstream, so only plain schemes pass.
fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str, scheme: &str) {
    match Url::parse(value) {
        Ok(url) if url.scheme() == scheme && url.host().is_some() => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("expected a {}:// URL with a host, got '{}'", scheme, url),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {}", e))),
    }
}

fn check_rate_limit(errors: &mut Vec<ValidationError>, section: &str, limit: &RateLimitConfig) {
    if !limit.enabled {
        return;
    }
    if limit.max_requests == 0 {
        errors.push(ValidationError::new(
            format!("{}.max_requests", section),
            "must be greater than zero",
        ));
    }
    if limit.window_secs == 0 {
        errors.push(ValidationError::new(
            format!("{}.window_secs", section),
            "must be greater than zero",
        ));
    }
}
