//! Gateway accept loop.
//!
//! # Responsibilities
//! - Bind the client-facing socket
//! - Cap concurrent connections with a semaphore
//! - Serve each socket with hyper, upgrades enabled for the WebSocket bridge
//! - Register every accepted socket so shutdown can cut it
//! - Stop accepting the moment shutdown starts

use axum::{extract::ConnectInfo, Router};
use hyper::{body::Incoming, service::service_fn, Request};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tower::ServiceExt;

use crate::config::ListenerConfig;
use crate::lifecycle::{contain_panics, Shutdown};
use crate::net::connection::HttpConnection;
use crate::session::{ConnectionRegistration, Registry};

/// Pause after a failed accept (e.g. EMFILE) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum ListenerError {
    Bind(std::io::Error),
    Accept(std::io::Error),
    /// The connection cap was torn down under the accept loop.
    LimitClosed,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "cannot bind gateway socket: {e}"),
            ListenerError::Accept(e) => write!(f, "accept failed: {e}"),
            ListenerError::LimitClosed => write!(f, "connection cap closed"),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Client-facing socket with at most `max_connections` live connections.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(ListenerError::Bind)?;

        Ok(Self::from_tcp(listener, config.max_connections))
    }

    /// Wrap an already bound socket.
    pub fn from_tcp(listener: TcpListener, max_connections: usize) -> Self {
        if let Ok(local_addr) = listener.local_addr() {
            tracing::info!(
                address = %local_addr,
                max_connections,
                "Listener bound"
            );
        }

        Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Wait for a free slot, then for the next socket.
    ///
    /// The returned permit frees the slot when dropped.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::LimitClosed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Free connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Serve `app` until the shutdown flag is raised.
    ///
    /// The listening socket is dropped as soon as shutdown starts, so new
    /// connections are refused while existing ones are drained by the
    /// shutdown sequencer.
    pub async fn serve(
        self,
        app: Router,
        registry: Arc<Registry>,
        shutdown: Shutdown,
    ) -> Result<(), ListenerError> {
        loop {
            let (stream, peer, permit) = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                accepted = self.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            let connection = Arc::new(HttpConnection::new(peer));
            let registration = registry.track_http_connection(&connection);
            tokio::spawn(serve_connection(stream, connection, app.clone(), permit, registration));
        }

        tracing::info!("Listener closed");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    connection: Arc<HttpConnection>,
    app: Router,
    _permit: ConnectionPermit,
    _registration: ConnectionRegistration,
) {
    let peer = connection.peer();
    let service = service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        contain_panics(app.clone().oneshot(request))
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let served = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);

    tokio::select! {
        result = served => {
            if let Err(e) = result {
                tracing::debug!(connection = %connection.id(), peer = %peer, error = %e, "Connection ended with error");
            }
        }
        _ = connection.terminated() => {
            tracing::debug!(connection = %connection.id(), peer = %peer, "Connection terminated");
        }
    }
}

/// One occupied connection slot; held by the serving task, even across a panic.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
