//! Gateway-owned JSON endpoints under `/api`.

use axum::{
    extract::{Query, State},
    http::Uri,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::security::{sanitize::sanitize_json, validate_settings_update};

/// `GET /api/health`
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `GET /api/config`
pub async fn get_config(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let settings = state.settings.load().await?;
    Ok(Json(json!({ "success": true, "config": *settings })))
}

/// `POST /api/config`
pub async fn update_config(
    State(state): State<AppState>,
    Json(mut body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    sanitize_json(&mut body);
    let update = validate_settings_update(&body).map_err(ApiError::InvalidSettings)?;

    let settings = state.settings.save(update).await?;
    tracing::info!(
        upstream_url = %settings.upstream_url,
        auto_connect = settings.auto_connect,
        "Settings updated"
    );
    Ok(Json(json!({
        "success": true,
        "message": "Configuration saved",
        "config": *settings,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    nocache: Option<String>,
}

/// `GET /api/system/stats[?nocache=true]`
pub async fn system_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, ApiError> {
    let bypass_cache = query.nocache.as_deref() == Some("true");
    let stats = state.stats.snapshot(bypass_cache).await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

/// `GET /api/system/connections`
pub async fn connections(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "sessions": state.registry.session_count(),
        "connections": state.registry.connection_count(),
        "shuttingDown": state.shutdown.is_shutting_down(),
    }))
}

/// Fallback for unmatched routes.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound {
        path: uri.path().to_owned(),
    }
}
