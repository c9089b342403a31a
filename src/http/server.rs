//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, request ID, timeouts, limits, CORS,
//!   compression, headers)
//! - Mount the gateway API, the upstream passthrough and the WebSocket bridge
//! - Hand the router to the listener's accept loop

use axum::{
    body::Body,
    handler::HandlerWithoutStateExt,
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{GatewayConfig, SettingsStore};
use crate::http::{api, error::ApiError, proxy, websocket};
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::observability::logging::log_requests;
use crate::security::{rate_limit_middleware, with_security_headers, RateLimiter};
use crate::session::Registry;
use crate::system::StatsCollector;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub client: Client<HttpConnector, Body>,
    pub registry: Arc<Registry>,
    pub shutdown: Shutdown,
    pub settings: Arc<SettingsStore>,
    pub stats: Arc<StatsCollector>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    registry: Arc<Registry>,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig, registry: Arc<Registry>, shutdown: Shutdown) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.upstream.connect_timeout()));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            settings: Arc::new(SettingsStore::new(
                &config.storage.data_dir,
                config.upstream.url.clone(),
            )),
            stats: Arc::new(StatsCollector::new(&config.system)),
            config: Arc::new(config),
            client,
            registry: Arc::clone(&registry),
            shutdown: shutdown.clone(),
        };

        let router = Self::build_router(state);
        Self {
            router,
            registry,
            shutdown,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = Arc::clone(&state.config);
        let global_limiter = Arc::new(RateLimiter::new("global", &config.rate_limit));
        let api_limiter = Arc::new(RateLimiter::new("api", &config.api_rate_limit));

        let limited_api = Router::new()
            .route("/api/config", get(api::get_config).post(api::update_config))
            .route("/api/system/stats", get(api::system_stats))
            .route("/api/system/connections", get(api::connections))
            .route_layer(middleware::from_fn_with_state(api_limiter, rate_limit_middleware));

        let api = Router::new()
            .route("/api/health", get(api::health))
            .merge(limited_api)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size));

        let prefix = &config.upstream.path_prefix;
        let upstream = Router::new()
            .route(&config.upstream.ws_path, get(websocket::ws_handler))
            .route(prefix, any(proxy::proxy_handler))
            .route(&format!("{prefix}/{{*rest}}"), any(proxy::proxy_handler));

        let router = Router::new().merge(api).merge(upstream);
        let router = match &config.storage.static_dir {
            Some(dir) => {
                tracing::info!(directory = %dir, "Serving static files");
                router.fallback_service(
                    ServeDir::new(dir).not_found_service(api::not_found.into_service()),
                )
            }
            None => router.fallback(api::not_found),
        };

        let router = router
            .with_state(state)
            .layer(middleware::from_fn_with_state(global_limiter, rate_limit_middleware))
            .layer(middleware::from_fn(log_requests))
            .layer(CompressionLayer::new())
            // Preflights for the upstream prefix are answered here, never forwarded.
            .layer(CorsLayer::permissive());
        let router = if config.security.enable_headers {
            with_security_headers(router)
        } else {
            router
        };

        router
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections until shutdown starts.
    pub async fn run(self, listener: Listener) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "HTTP server starting");

        listener
            .serve(self.router, self.registry, self.shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "Request handler panicked");
    ApiError::Internal.into_response()
}
