//! Per-client rate limiting middleware.
//!
//! Each limiter keeps one token bucket per client IP. A bucket holds
//! `max_requests` tokens and refills at `max_requests / window_secs` tokens
//! per second, so a client gets its full allowance per window with bursts up
//! to the allowance.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::http::error::ApiError;
use crate::observability::metrics;

/// Buckets beyond this count trigger a sweep of idle clients.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
}

pub struct RateLimiter {
    name: &'static str,
    enabled: bool,
    capacity: f64,
    refill_per_sec: f64,
    window: Duration,
    buckets: DashMap<IpAddr, TokenBucket>,
}

impl RateLimiter {
    pub fn new(name: &'static str, config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.max_requests.max(1));
        let window = Duration::from_secs(config.window_secs.max(1));
        Self {
            name,
            enabled: config.enabled,
            capacity,
            refill_per_sec: capacity / window.as_secs_f64(),
            window,
            buckets: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Take one token for `client`.
    pub fn check(&self, client: IpAddr) -> Decision {
        if self.buckets.len() > MAX_TRACKED_CLIENTS {
            self.sweep();
        }

        let mut bucket = self
            .buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new(self.capacity));
        let allowed = bucket.try_acquire(self.capacity, self.refill_per_sec);

        Decision {
            allowed,
            limit: self.capacity as u32,
            remaining: bucket.tokens.max(0.0).floor() as u32,
        }
    }

    // Clients idle for a whole window have a full bucket again anyway.
    fn sweep(&self) {
        let window = self.window;
        self.buckets
            .retain(|_, bucket| bucket.last_update.elapsed() < window);
    }
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let decision = limiter.check(client);
    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(client = %client, limiter = limiter.name, "Rate limit exceeded");
        metrics::record_rate_limited(limiter.name);
        ApiError::RateLimited.into_response()
    };

    let headers = response.headers_mut();
    headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
    response
}
