//! Validation of settings updates posted to the API.

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::SettingsUpdate;

/// A single rejected field, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl FieldError {
    fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

/// Validate a (sanitized) settings document and turn it into an update.
///
/// `upstreamUrl` is required and must be an absolute http(s) URL.
/// `backendUrl` may be a string or null; blank means unset.
/// `autoConnect` defaults to true.
pub fn validate_settings_update(body: &Value) -> Result<SettingsUpdate, Vec<FieldError>> {
    let Some(object) = body.as_object() else {
        return Err(vec![FieldError::new("body", "Request body must be a JSON object")]);
    };

    let mut errors = Vec::new();

    let upstream_url = match object.get("upstreamUrl") {
        None | Some(Value::Null) => {
            errors.push(FieldError::new("upstreamUrl", "Upstream URL is required"));
            None
        }
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                errors.push(FieldError::new("upstreamUrl", "Upstream URL is required"));
                None
            } else if !is_http_url(trimmed) {
                errors.push(FieldError::new("upstreamUrl", "Invalid upstream URL format"));
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(_) => {
            errors.push(FieldError::new("upstreamUrl", "Upstream URL must be a string"));
            None
        }
    };

    let backend_url = match object.get("backendUrl") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) if raw.trim().is_empty() => None,
        Some(Value::String(raw)) => Some(raw.trim().to_string()),
        Some(_) => {
            errors.push(FieldError::new("backendUrl", "Backend URL must be a string"));
            None
        }
    };

    let auto_connect = match object.get("autoConnect") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(flag)) => *flag,
        Some(_) => {
            errors.push(FieldError::new("autoConnect", "autoConnect must be a boolean"));
            true
        }
    };

    match upstream_url {
        Some(upstream_url) if errors.is_empty() => Ok(SettingsUpdate {
            upstream_url,
            backend_url,
            auto_connect,
        }),
        _ => Err(errors),
    }
}

fn is_http_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}
