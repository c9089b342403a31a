//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (global per-IP limit, stricter limit on /api)
//!     → handler
//!     → headers.rs (hardening headers on the way out, tower-http layers)
//!
//! Settings updates:
//!     → sanitize.rs (strip script blocks and event handlers)
//!     → validation.rs (field checks, typed update)
//! ```
//!
//! # Design Decisions
//! - Limits are keyed by peer IP only; no trust in forwarded headers
//! - Headers set by the upstream are left alone

pub mod headers;
pub mod rate_limit;
pub mod sanitize;
pub mod validation;

pub use headers::with_security_headers;
pub use rate_limit::{rate_limit_middleware, RateLimiter};
pub use validation::{validate_settings_update, FieldError};
