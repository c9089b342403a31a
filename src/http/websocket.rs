//! WebSocket bridge.
//!
//! # Responsibilities
//! - Refuse upgrades once shutdown has started
//! - Register a session for every accepted client
//! - Dial the upstream WebSocket with the client's query string
//! - Relay data frames in both directions until either side ends
//! - Close the surviving side and unregister the session
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Gateway ←──── WebSocket frames ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - Frame-level forwarding (no message buffering, no inspection)
//! - Ping/pong are answered per hop and never relayed
//! - Both forward loops run in one task, so a pending read on one direction
//!   never stalls the other

use axum::{
    extract::{
        ws::{self, rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        RawQuery, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::Instrument;

use crate::config::UpstreamConfig;
use crate::http::error::{ApiError, UpstreamError};
use crate::http::server::AppState;
use crate::lifecycle::SHUTDOWN_REASON;
use crate::observability::metrics;
use crate::session::{
    Frame, Session, SessionId, SessionState, Side, SinkChannel, WireMessage, WsChannel,
    CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR,
};

/// Close reason sent to one side after the other side went away.
pub const PEER_CLOSED_REASON: &str = "Peer closed";

/// Close reason sent to the client when the upstream dial fails.
pub const UPSTREAM_UNREACHABLE_REASON: &str = "Upstream unreachable";

/// Upgrade handler for the client-facing WebSocket path.
pub async fn ws_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        tracing::debug!("Refusing WebSocket upgrade during shutdown");
        return ApiError::ShuttingDown.into_response();
    }
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let target = upstream_ws_url(&state.config.upstream, query.as_deref());
    upgrade.on_upgrade(move |socket| bridge(socket, target, state))
}

/// `<ws base><upstream ws path>?<query>`; the query is passed through verbatim.
pub fn upstream_ws_url(upstream: &UpstreamConfig, query: Option<&str>) -> String {
    let mut url = format!("{}{}", upstream.ws_base(), upstream.upstream_ws_path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

async fn bridge(socket: WebSocket, target: String, state: AppState) {
    let (client_sink, client_stream) = socket.split();
    let client: Arc<dyn WsChannel> =
        Arc::new(SinkChannel::<_, ws::Message>::new(Side::Client, client_sink));
    let session = Arc::new(Session::new(SessionId::new(), Arc::clone(&client)));

    // Dropping the registration unregisters the session.
    let _registration = match state.registry.register(&session) {
        Ok(registration) => registration,
        Err(_) => {
            if let Err(e) = client.close(CLOSE_INTERNAL_ERROR, "Session registration failed").await {
                tracing::debug!(error = %e, "Failed to close rejected client");
            }
            return;
        }
    };

    let span = tracing::info_span!("ws_session", session_id = %session.id());
    metrics::session_opened();
    run_session(&session, client_stream, &target, &state)
        .instrument(span)
        .await;
    metrics::session_closed();
}

async fn run_session<S>(session: &Arc<Session>, mut client_stream: S, target: &str, state: &AppState)
where
    S: Stream<Item = Result<ws::Message, axum::Error>> + Unpin,
{
    let client = Arc::clone(session.client());
    let close_limit = state.config.timeouts.close();

    // The sequencer may have taken its snapshot before this session existed.
    if state.shutdown.is_shutting_down() {
        close_logged(&client, CLOSE_GOING_AWAY, SHUTDOWN_REASON, close_limit).await;
        session.advance(SessionState::Closed);
        return;
    }

    tracing::debug!(upstream = %target, "Dialing upstream WebSocket");
    let timeout = state.config.upstream.connect_timeout();
    let dial = tokio::time::timeout(timeout, connect_async(target));
    tokio::pin!(dial);

    let dialed = loop {
        tokio::select! {
            result = &mut dial => break match result {
                Ok(Ok((stream, _response))) => Ok(stream),
                Ok(Err(e)) => Err(UpstreamError::Unreachable(e.to_string())),
                Err(_) => Err(UpstreamError::Timeout(timeout)),
            },
            incoming = client_stream.next() => match incoming.map(|r| r.map(WireMessage::into_frame)) {
                Some(Ok(Some(frame))) if frame.is_data() => {
                    tracing::warn!("Dropping client frame received before upstream opened");
                    metrics::record_dropped_frame("upstream_connecting");
                }
                Some(Ok(Some(Frame::Close(_)))) | Some(Err(_)) | None => {
                    tracing::debug!("Client left before upstream opened");
                    session.advance(SessionState::Closing);
                    client.release().await;
                    session.advance(SessionState::Closed);
                    return;
                }
                Some(Ok(_)) => {}
            },
            _ = session.cancelled() => {
                session.advance(SessionState::Closed);
                return;
            }
        }
    };

    let upstream_ws = match dialed {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(upstream = %target, error = %e, "Upstream WebSocket connection failed");
            metrics::record_upstream_error("ws_dial");
            close_logged(&client, CLOSE_INTERNAL_ERROR, UPSTREAM_UNREACHABLE_REASON, close_limit).await;
            session.advance(SessionState::Closed);
            return;
        }
    };

    let (upstream_sink, upstream_stream) = upstream_ws.split();
    let upstream: Arc<dyn WsChannel> = Arc::new(SinkChannel::<_, tungstenite::Message>::new(
        Side::Upstream,
        upstream_sink,
    ));
    session.attach_upstream(Arc::clone(&upstream));

    // Cancelled while dialing: the sequencer only saw the client channel.
    if session.is_cancelled() {
        close_logged(&upstream, CLOSE_GOING_AWAY, SHUTDOWN_REASON, close_limit).await;
        session.advance(SessionState::Closed);
        return;
    }

    session.advance(SessionState::Open);
    tracing::info!(upstream = %target, "WebSocket session open");

    let ended = tokio::select! {
        side = forward(client_stream, Side::Client, &upstream) => Some(side),
        side = forward(upstream_stream, Side::Upstream, &client) => Some(side),
        _ = session.cancelled() => None,
    };

    session.advance(SessionState::Closing);
    if let Some(side) = ended {
        let reason = if state.shutdown.is_shutting_down() {
            SHUTDOWN_REASON
        } else {
            PEER_CLOSED_REASON
        };
        let (ended_channel, survivor) = match side {
            Side::Client => (&client, &upstream),
            Side::Upstream => (&upstream, &client),
        };
        teardown(ended_channel, survivor, reason, close_limit).await;
    }
    session.advance(SessionState::Closed);
    tracing::info!(ended_by = ?ended, "WebSocket session closed");
}

/// Release the side that ended and close the survivor with 1001.
///
/// Each step gets at most `limit`, so a peer that stopped reading cannot pin
/// the session in the registry.
async fn teardown(
    ended: &Arc<dyn WsChannel>,
    survivor: &Arc<dyn WsChannel>,
    reason: &str,
    limit: Duration,
) {
    if tokio::time::timeout(limit, ended.release()).await.is_err() {
        tracing::warn!(side = %ended.side(), "Timed out releasing WebSocket channel");
        metrics::record_close_error("teardown");
    }

    if !survivor.is_open() {
        return;
    }
    match tokio::time::timeout(limit, survivor.close(CLOSE_GOING_AWAY, reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Error closing surviving WebSocket channel");
            metrics::record_close_error("teardown");
        }
        Err(_) => {
            tracing::warn!(side = %survivor.side(), "Timed out closing surviving WebSocket channel");
            metrics::record_close_error("teardown");
        }
    }
}

/// Relay data frames read from `from` to `to` until `from` ends.
///
/// Returns the side that ended: `from` on close, read error or end of stream,
/// `to` if writing to it failed.
async fn forward<St, M, E>(mut stream: St, from: Side, to: &Arc<dyn WsChannel>) -> Side
where
    St: Stream<Item = Result<M, E>> + Unpin,
    M: WireMessage,
    E: Display,
{
    while let Some(item) = stream.next().await {
        let frame = match item {
            Ok(message) => message.into_frame(),
            Err(e) => {
                tracing::debug!(side = %from, error = %e, "WebSocket read failed");
                return from;
            }
        };

        match frame {
            Some(Frame::Close(info)) => {
                tracing::debug!(side = %from, close = ?info, "Close frame received");
                return from;
            }
            Some(frame) if frame.is_data() => match to.send(frame).await {
                Ok(true) => metrics::record_frame(from),
                Ok(false) => metrics::record_dropped_frame("peer_closed"),
                Err(e) => {
                    tracing::warn!(error = %e, "Forwarding failed");
                    return from.opposite();
                }
            },
            _ => {}
        }
    }
    from
}

async fn close_logged(channel: &Arc<dyn WsChannel>, code: u16, reason: &str, limit: Duration) {
    match tokio::time::timeout(limit, channel.close(code, reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(side = %channel.side(), error = %e, "Error closing WebSocket channel");
        }
        Err(_) => tracing::warn!(side = %channel.side(), "Timed out closing WebSocket channel"),
    }
}
