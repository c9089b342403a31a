//! Shutdown coordination for the gateway.

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::ShutdownConfig;
use crate::lifecycle::watchdog::Watchdog;
use crate::observability::metrics;
use crate::session::{Registry, Session, CLOSE_GOING_AWAY};

/// Close reason sent to every WebSocket peer during shutdown.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Process-wide shutdown flag.
///
/// Starts false, flips to true exactly once, never resets. Long-running tasks
/// subscribe to it; late subscribers still observe the flag.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Set the flag. Returns true only for the caller that actually set it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|shutting_down| {
            if *shutting_down {
                false
            } else {
                *shutting_down = true;
                true
            }
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is set.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|shutting_down| *shutting_down).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// How the process ends. Swapped out in tests.
pub trait Exit: Send + Sync + 'static {
    fn exit(&self, code: i32);
}

/// Ends the process with `std::process::exit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl Exit for ProcessExit {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// What a completed drain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub exit_code: i32,
    pub sessions_closed: usize,
    pub close_errors: usize,
    pub connections_terminated: usize,
}

/// Drains sessions and connections, then exits.
pub struct ShutdownSequencer {
    shutdown: Shutdown,
    registry: Arc<Registry>,
    config: ShutdownConfig,
    exit: Arc<dyn Exit>,
}

impl ShutdownSequencer {
    pub fn new(
        shutdown: Shutdown,
        registry: Arc<Registry>,
        config: ShutdownConfig,
        exit: Arc<dyn Exit>,
    ) -> Self {
        Self {
            shutdown,
            registry,
            config,
            exit,
        }
    }

    /// Run the sequence with the given exit code.
    ///
    /// Only the first caller drains; later and concurrent callers get `None`
    /// straight away. The watchdog exits the process with status 1 if the
    /// sequence does not finish within the configured ceiling.
    pub async fn run(&self, exit_code: i32) -> Option<ShutdownReport> {
        if !self.shutdown.trigger() {
            tracing::debug!(exit_code, "Shutdown already in progress");
            return None;
        }
        tracing::info!(exit_code, "Initiating graceful shutdown");
        let watchdog = Watchdog::arm(self.config.watchdog(), Arc::clone(&self.exit));

        // Setting the flag is what stops the listener; it drops its socket on
        // the next poll.
        let report = self.drain(exit_code).await;

        tokio::time::sleep(self.config.grace_period()).await;
        watchdog.disarm();

        tracing::info!(
            sessions_closed = report.sessions_closed,
            close_errors = report.close_errors,
            connections_terminated = report.connections_terminated,
            "Graceful shutdown complete"
        );
        self.exit.exit(exit_code);
        Some(report)
    }

    async fn drain(&self, exit_code: i32) -> ShutdownReport {
        let snapshot = self.registry.snapshot();

        if !snapshot.sessions.is_empty() {
            tracing::info!(
                count = snapshot.sessions.len(),
                "Closing WebSocket sessions"
            );
        }
        let close_errors: usize = join_all(
            snapshot
                .sessions
                .iter()
                .map(|session| self.close_session(session)),
        )
        .await
        .into_iter()
        .sum();

        for connection in &snapshot.connections {
            connection.terminate();
            self.registry.untrack_http_connection(&connection.id());
        }
        if !snapshot.connections.is_empty() {
            tracing::info!(
                count = snapshot.connections.len(),
                "Terminated open HTTP connections"
            );
        }

        ShutdownReport {
            exit_code,
            sessions_closed: snapshot.sessions.len(),
            close_errors,
            connections_terminated: snapshot.connections.len(),
        }
    }

    /// Close both channels of one session. Failures are logged and counted,
    /// never propagated, and the session is unregistered either way.
    async fn close_session(&self, session: &Session) -> usize {
        let id = session.id();
        let results = join_all(
            session
                .channels()
                .map(|channel| channel.close(CLOSE_GOING_AWAY, SHUTDOWN_REASON)),
        )
        .await;

        let mut errors = 0;
        for result in results {
            if let Err(e) = result {
                tracing::warn!(session_id = %id, error = %e, "Error closing WebSocket channel");
                metrics::record_close_error("shutdown");
                errors += 1;
            }
        }

        session.cancel();
        self.registry.unregister(&id);
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::HttpConnection;
    use crate::session::testing::{FailingChannel, HangingChannel, NullChannel};
    use crate::session::{SessionId, Side, WsChannel};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingExit(Mutex<Vec<i32>>);

    impl RecordingExit {
        fn codes(&self) -> Vec<i32> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Exit for RecordingExit {
        fn exit(&self, code: i32) {
            self.0.lock().unwrap().push(code);
        }
    }

    fn fast_config() -> ShutdownConfig {
        ShutdownConfig {
            grace_period_ms: 20,
            watchdog_ms: 300,
        }
    }

    fn sequencer(registry: &Arc<Registry>, exit: &Arc<RecordingExit>) -> ShutdownSequencer {
        ShutdownSequencer::new(
            Shutdown::new(),
            Arc::clone(registry),
            fast_config(),
            Arc::clone(exit) as Arc<dyn Exit>,
        )
    }

    fn bridged(client: Arc<dyn WsChannel>, upstream: Arc<dyn WsChannel>) -> Arc<Session> {
        let session = Arc::new(Session::new(SessionId::new(), client));
        session.attach_upstream(upstream);
        session
    }

    #[test]
    fn trigger_is_set_once() {
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        assert!(!shutdown.is_shutting_down());
        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert!(shutdown.is_shutting_down());
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn drains_every_session_and_connection() {
        let registry = Arc::new(Registry::new());
        let exit = Arc::new(RecordingExit::default());

        let mut channels = Vec::new();
        let mut sessions = Vec::new();
        let mut guards = Vec::new();
        for _ in 0..3 {
            let client = Arc::new(NullChannel::new(Side::Client));
            let upstream = Arc::new(NullChannel::new(Side::Upstream));
            let session = bridged(client.clone(), upstream.clone());
            guards.push(registry.register(&session).unwrap());
            channels.push(client);
            channels.push(upstream);
            sessions.push(session);
        }
        let connections: Vec<_> = (0..2)
            .map(|i| Arc::new(HttpConnection::new(format!("127.0.0.1:{}", 41000 + i).parse().unwrap())))
            .collect();
        let conn_guards: Vec<_> = connections
            .iter()
            .map(|c| registry.track_http_connection(c))
            .collect();

        let report = sequencer(&registry, &exit).run(0).await.unwrap();

        assert_eq!(
            report,
            ShutdownReport {
                exit_code: 0,
                sessions_closed: 3,
                close_errors: 0,
                connections_terminated: 2,
            }
        );
        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.connection_count(), 0);
        assert!(connections.iter().all(|c| c.is_terminated()));
        assert!(sessions.iter().all(|s| s.is_cancelled()));
        for channel in &channels {
            assert_eq!(
                *channel.closed_with.lock().unwrap(),
                Some((CLOSE_GOING_AWAY, SHUTDOWN_REASON.to_string()))
            );
        }
        assert_eq!(exit.codes(), vec![0]);
        drop(guards);
        drop(conn_guards);
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_the_rest() {
        let registry = Arc::new(Registry::new());
        let exit = Arc::new(RecordingExit::default());

        let broken = bridged(
            Arc::new(FailingChannel(Side::Client)),
            Arc::new(NullChannel::new(Side::Upstream)),
        );
        let healthy_client = Arc::new(NullChannel::new(Side::Client));
        let healthy = bridged(healthy_client.clone(), Arc::new(NullChannel::new(Side::Upstream)));
        let _g1 = registry.register(&broken).unwrap();
        let _g2 = registry.register(&healthy).unwrap();

        let report = sequencer(&registry, &exit).run(1).await.unwrap();

        assert_eq!(report.close_errors, 1);
        assert_eq!(report.sessions_closed, 2);
        assert_eq!(registry.session_count(), 0);
        assert!(healthy_client.closed_with.lock().unwrap().is_some());
        assert_eq!(exit.codes(), vec![1]);
    }

    #[tokio::test]
    async fn concurrent_triggers_drain_once() {
        let registry = Arc::new(Registry::new());
        let exit = Arc::new(RecordingExit::default());
        let sequencer = sequencer(&registry, &exit);

        let (a, b) = tokio::join!(sequencer.run(0), sequencer.run(0));
        assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
        assert_eq!(exit.codes(), vec![0]);

        assert!(sequencer.run(1).await.is_none());
        assert_eq!(exit.codes(), vec![0]);
    }

    #[tokio::test]
    async fn watchdog_fires_when_a_close_hangs() {
        let registry = Arc::new(Registry::new());
        let exit = Arc::new(RecordingExit::default());
        let stuck = bridged(
            Arc::new(HangingChannel(Side::Client)),
            Arc::new(NullChannel::new(Side::Upstream)),
        );
        let _guard = registry.register(&stuck).unwrap();

        let sequencer = sequencer(&registry, &exit);
        let outcome = tokio::time::timeout(Duration::from_millis(600), sequencer.run(0)).await;
        assert!(outcome.is_err(), "sequence should still be stuck on the close");

        // The watchdog thread fires on its own deadline.
        for _ in 0..50 {
            if !exit.codes().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(exit.codes(), vec![1]);
    }
}
