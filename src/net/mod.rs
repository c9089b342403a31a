//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (tracked in the registry until it closes)
//!     → Hand off to HTTP layer (hyper auto builder, upgrades enabled)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Upgraded WebSocket connections leave the tracking set and become sessions

pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, HttpConnection};
pub use listener::{Listener, ListenerError};
