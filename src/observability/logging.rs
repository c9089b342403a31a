//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber (pretty or JSON output)
//! - Copy warnings and errors to a daily file under `observability.log_dir`
//! - Log one line per request with status and duration
//!
//! Per-request traffic goes to the `traffic` target at debug level so it can
//! be filtered separately from errors (e.g. `RUST_LOG=info,traffic=off`).

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::LevelFilter, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
    Layer, Registry,
};

use crate::config::ObservabilityConfig;
use crate::observability::metrics;

/// Log target for per-request traffic lines.
pub const TRAFFIC: &str = "traffic";

/// Log files are named `gateway.<YYYY-MM-DD>.log`.
pub const LOG_FILE_PREFIX: &str = "gateway";

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// The returned guard must be held for as long as the process logs; dropping
/// it flushes the file writer.
pub fn init_logging(config: &ObservabilityConfig) -> Result<Option<WorkerGuard>, InitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(daily_log_file(dir)?);
            (Some(warn_file_layer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(file_layer).with(filter);
    if config.log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(guard)
}

/// Daily rotating file in `dir`, created if missing.
pub fn daily_log_file(dir: &str) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir)
}

/// Plain-text layer that only passes WARN and ERROR events to `writer`.
pub fn warn_file_layer<W>(writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(LevelFilter::WARN)
        .boxed()
}

/// Middleware: one log line and one metrics sample per request.
pub async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis() as u64;
    if status >= 400 {
        tracing::warn!(target: TRAFFIC, %method, %path, status, duration_ms, "Request completed");
    } else {
        tracing::debug!(target: TRAFFIC, %method, %path, status, duration_ms, "Request completed");
    }
    metrics::record_request(method.as_str(), status, start);

    response
}
