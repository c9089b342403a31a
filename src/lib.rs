//! ComfyUI front door library.
//!
//! A gateway that sits between a browser UI and one upstream compute service,
//! forwarding HTTP and WebSocket traffic and adding rate limiting, logging,
//! metrics, settings persistence and graceful shutdown.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod session;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod system;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::{Shutdown, ShutdownSequencer};
pub use session::Registry;
