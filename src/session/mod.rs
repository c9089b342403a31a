//! WebSocket session tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Client upgrade accepted
//!     → handle.rs (Session: id, state, channel handles)
//!     → registry.rs (weak entry + drop guard)
//!     → channel.rs (frames forwarded through WsChannel)
//!
//! Session States:
//!     Connecting → Open → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - The bridge owns each session; the registry never extends its lifetime
//! - A closed channel silently drops frames instead of erroring
//! - Registry snapshots are owned copies, safe to iterate while sessions churn

pub mod channel;
pub mod handle;
pub mod registry;

pub use channel::{
    ChannelError, CloseInfo, Frame, Side, SinkChannel, WireMessage, WsChannel, CLOSE_GOING_AWAY,
    CLOSE_INTERNAL_ERROR,
};
pub use handle::{Session, SessionId, SessionState};
pub use registry::{
    ConnectionRegistration, Registry, RegistryError, RegistrySnapshot, SessionRegistration,
};
