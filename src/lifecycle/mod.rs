//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → exit code 0
//!     Server task failure/panic → exit code 1
//!
//! Faults (faults.rs):
//!     Panic outside request handling → exit code 1
//!
//! Shutdown (shutdown.rs):
//!     Set flag (once) → listener stops accepting
//!     → close every session with 1001 → terminate HTTP sockets
//!     → grace period → exit
//!
//! Watchdog (watchdog.rs):
//!     Armed when the sequence starts → forced exit(1) at the ceiling
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Individual close failures are logged and skipped, never propagated
//! - Shutdown has a timeout: forced exit after deadline

pub mod faults;
pub mod shutdown;
pub mod signals;
pub mod watchdog;

pub use faults::{contain_panics, watch_panics};
pub use shutdown::{Exit, ProcessExit, Shutdown, ShutdownReport, ShutdownSequencer, SHUTDOWN_REASON};
pub use signals::{wait_for_signal, Termination};
pub use watchdog::Watchdog;
