//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! gateway.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! settings.json (UI preferences)
//!     → settings.rs (load / save, cached in an ArcSwap)
//! ```
//!
//! # Design Decisions
//! - Gateway config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod settings;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::GatewayConfig;
pub use schema::{
    ListenerConfig, ObservabilityConfig, RateLimitConfig, SecurityConfig, ShutdownConfig,
    StorageConfig, SystemConfig, TimeoutConfig, UpstreamConfig,
};
pub use settings::{Settings, SettingsError, SettingsStore, SettingsUpdate};
