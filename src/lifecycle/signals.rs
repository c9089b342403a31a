//! OS signal handling.
//!
//! SIGINT and SIGTERM both request a normal shutdown (exit 0). A server
//! fault is reported as [`Termination::Fault`] and exits non-zero.

/// Why the process is going down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
    Fault(String),
}

impl Termination {
    pub fn exit_code(&self) -> i32 {
        match self {
            Termination::Interrupt | Termination::Terminate => 0,
            Termination::Fault(_) => 1,
        }
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn wait_for_signal() -> Termination {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {
            tracing::info!("Received SIGINT signal");
            Termination::Interrupt
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
            Termination::Terminate
        }
    }
}
