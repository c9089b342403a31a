//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection (net::listener)
//!     → server.rs (Axum router, middleware stack)
//!     → api.rs (gateway-owned /api endpoints)
//!     → proxy.rs (prefix stripped, streamed to the upstream)
//!     → websocket.rs (upgrade, bridged to the upstream WebSocket)
//!     → error.rs (JSON error bodies)
//! ```

pub mod api;
pub mod error;
pub mod proxy;
pub mod server;
pub mod websocket;

pub use error::{ApiError, UpstreamError};
pub use server::{AppState, HttpServer};
