//! Last-resort shutdown timer.
//!
//! Runs on its own OS thread so a wedged async runtime cannot stall it, and
//! is detached so it never keeps the process alive on its own.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::lifecycle::shutdown::Exit;

/// Exit status used when the watchdog has to step in.
pub const WATCHDOG_EXIT_CODE: i32 = 1;

pub struct Watchdog {
    disarm: mpsc::Sender<()>,
}

impl Watchdog {
    /// Start counting. Unless disarmed within `ceiling`, `exit` is called
    /// with [`WATCHDOG_EXIT_CODE`].
    ///
    /// Dropping the watchdog without disarming it leaves the deadline in force.
    pub fn arm(ceiling: Duration, exit: Arc<dyn Exit>) -> Self {
        let (disarm, rx) = mpsc::channel::<()>();
        let deadline = Instant::now() + ceiling;

        let spawned = std::thread::Builder::new()
            .name("shutdown-watchdog".into())
            .spawn(move || {
                match rx.recv_timeout(ceiling) {
                    Ok(()) => return,
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    }
                }
                tracing::error!(
                    ceiling_ms = ceiling.as_millis() as u64,
                    "Shutdown timeout - forcing exit"
                );
                exit.exit(WATCHDOG_EXIT_CODE);
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "Failed to start shutdown watchdog");
        }
        Self { disarm }
    }

    /// Stop the timer.
    pub fn disarm(self) {
        let _ = self.disarm.send(());
    }
}
