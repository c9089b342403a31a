//! Session identity and lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use uuid::Uuid;

use crate::session::channel::WsChannel;

/// Unique identifier for a bridged WebSocket session.
///
/// Random v4 UUIDs make collisions within one process negligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

/// Session state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Client accepted, upstream dial in progress.
    Connecting = 0,
    /// Both channels open, frames flowing.
    Open = 1,
    /// One side ended, the other is being closed.
    Closing = 2,
    /// Both channels closed.
    Closed = 3,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Connecting,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// One client ↔ upstream WebSocket pairing.
///
/// Owned by the bridge task that accepted the client; the registry keeps a
/// weak reference for bookkeeping and shutdown signaling.
pub struct Session {
    id: SessionId,
    state: AtomicU8,
    client: Arc<dyn WsChannel>,
    upstream: OnceLock<Arc<dyn WsChannel>>,
    cancel: watch::Sender<bool>,
}

impl Session {
    pub fn new(id: SessionId, client: Arc<dyn WsChannel>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            id,
            state: AtomicU8::new(SessionState::Connecting as u8),
            client,
            upstream: OnceLock::new(),
            cancel,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Advance to `next`. Returns false if the session is already there or past it.
    pub fn advance(&self, next: SessionState) -> bool {
        let next = next as u8;
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < next).then_some(next)
            })
            .is_ok()
    }

    pub fn client(&self) -> &Arc<dyn WsChannel> {
        &self.client
    }

    pub fn upstream(&self) -> Option<&Arc<dyn WsChannel>> {
        self.upstream.get()
    }

    /// Attach the upstream channel once its handshake completed.
    pub fn attach_upstream(&self, channel: Arc<dyn WsChannel>) -> bool {
        self.upstream.set(channel).is_ok()
    }

    /// The channels currently attached, client first.
    pub fn channels(&self) -> impl Iterator<Item = &Arc<dyn WsChannel>> {
        std::iter::once(&self.client).chain(self.upstream.get())
    }

    /// Ask the owning bridge task to stop forwarding.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once [`Session::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives in `self`, so this only returns once cancelled.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("upstream_attached", &self.upstream.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::NullChannel;
    use crate::session::channel::Side;

    fn session() -> Session {
        Session::new(SessionId::new(), Arc::new(NullChannel::new(Side::Client)))
    }

    #[test]
    fn session_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| SessionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn state_only_moves_forward() {
        let session = session();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.advance(SessionState::Open));
        assert!(session.advance(SessionState::Closing));
        assert!(!session.advance(SessionState::Open));
        assert!(!session.advance(SessionState::Closing));
        assert!(session.advance(SessionState::Closed));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn dial_failure_can_skip_straight_to_closed() {
        let session = session();
        assert!(session.advance(SessionState::Closed));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn upstream_attaches_once() {
        let session = session();
        assert_eq!(session.channels().count(), 1);
        assert!(session.attach_upstream(Arc::new(NullChannel::new(Side::Upstream))));
        assert!(!session.attach_upstream(Arc::new(NullChannel::new(Side::Upstream))));
        let sides: Vec<_> = session.channels().map(|c| c.side()).collect();
        assert_eq!(sides, vec![Side::Client, Side::Upstream]);
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let session = Arc::new(session());
        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.cancelled().await })
        };
        tokio::task::yield_now().await;
        assert!(!session.is_cancelled());
        session.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_cancelled());
    }
}
