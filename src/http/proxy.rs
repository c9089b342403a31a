//! HTTP passthrough to the upstream.
//!
//! # Responsibilities
//! - Strip the client-facing prefix and rebuild the upstream URI
//! - Forward method, headers, query and body (streamed, never buffered)
//! - Stream the upstream response back with CORS opened up
//! - Report upstream failures as 502 without retrying

use axum::{
    body::Body,
    extract::State,
    http::{header, uri::Uri, HeaderMap, HeaderName, HeaderValue, Request, Version},
    response::{IntoResponse, Response},
};
use crate::http::error::{ApiError, UpstreamError};
use crate::http::server::AppState;
use crate::observability::metrics;

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forward any request under the prefix to the upstream.
pub async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (mut parts, body) = request.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_owned();

    let uri = match upstream_uri(&state.config.upstream.url, &state.config.upstream.path_prefix, &parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(%method, %path, error = %e, "Cannot build upstream URI");
            metrics::record_upstream_error("http");
            return ApiError::from(e).into_response();
        }
    };

    strip_hop_by_hop(&mut parts.headers);
    if let Some(authority) = uri.authority() {
        if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
            parts.headers.insert(header::HOST, host);
        }
    }
    parts.uri = uri.clone();
    // The upstream connector speaks HTTP/1.1 regardless of the client's version.
    parts.version = Version::HTTP_11;

    let request = Request::from_parts(parts, body);
    match state.client.request(request).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            parts
                .headers
                .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            // The request logging middleware writes the one traffic line.
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            let details = error_chain(&e);
            tracing::error!(%method, %path, upstream = %uri, error = %details, "Upstream request failed");
            metrics::record_upstream_error("http");
            ApiError::Upstream(UpstreamError::Unreachable(details)).into_response()
        }
    }
}

/// Map `<prefix><rest>?<query>` onto `<upstream base><rest>?<query>`.
pub fn upstream_uri(base: &str, prefix: &str, original: &Uri) -> Result<Uri, UpstreamError> {
    let path = original.path();
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    let rest = if rest.is_empty() { "/" } else { rest };

    let mut target = format!("{}{}", base.trim_end_matches('/'), rest);
    if let Some(query) = original.query() {
        target.push('?');
        target.push_str(query);
    }

    target
        .parse::<Uri>()
        .map_err(|e| UpstreamError::Unreachable(format!("invalid upstream URI {target}: {e}")))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop as well.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
