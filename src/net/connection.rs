//! Plain HTTP connection handles.
//!
//! # Responsibilities
//! - Number accepted sockets `conn-1`, `conn-2`, ... for logs and the registry
//! - Give the shutdown path a way to force-terminate an accepted socket
//!
//! The listener task owns each [`HttpConnection`]; the registry only holds a
//! weak reference to it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Process-unique, monotonically increasing connection number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle to one accepted transport connection.
#[derive(Debug)]
pub struct HttpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    terminate: watch::Sender<bool>,
}

impl HttpConnection {
    pub fn new(peer: SocketAddr) -> Self {
        let (terminate, _) = watch::channel(false);
        Self {
            id: ConnectionId::new(),
            peer,
            terminate,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Force the serving task to drop the socket.
    pub fn terminate(&self) {
        self.terminate.send_replace(true);
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminate.borrow()
    }

    /// Resolves once [`HttpConnection::terminate`] has been called.
    pub async fn terminated(&self) {
        let mut rx = self.terminate.subscribe();
        let _ = rx.wait_for(|terminated| *terminated).await;
    }
}
