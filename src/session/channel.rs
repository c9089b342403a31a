//! One side of a bridged WebSocket pair.
//!
//! The two WebSocket libraries in play (axum on the client side,
//! tokio-tungstenite on the upstream side) each have their own message type.
//! Both are mapped onto [`Frame`] so the bridge can forward without caring
//! which side it is talking to.
//!
//! A channel is "open for sending" until it is closed locally or released
//! after the peer closed it. Sends to a closed channel are dropped silently.

use axum::extract::ws;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite;

/// 1001: endpoint going away (peer closed or gateway shutting down).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// 1011: unexpected condition; used when the upstream cannot be reached.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Which end of the bridge a channel faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Upstream,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Client => Side::Upstream,
            Side::Upstream => Side::Client,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Upstream => "upstream",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Close code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// Library-neutral WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseInfo>),
}

impl Frame {
    /// Data frames are relayed; control frames are handled per hop.
    pub fn is_data(&self) -> bool {
        matches!(self, Frame::Text(_) | Frame::Binary(_))
    }
}

/// Conversion between a library message type and [`Frame`].
pub trait WireMessage: Sized + Send {
    /// `None` for raw frames that never surface through a message stream.
    fn into_frame(self) -> Option<Frame>;
    fn from_frame(frame: Frame) -> Self;
}

impl WireMessage for ws::Message {
    fn into_frame(self) -> Option<Frame> {
        Some(match self {
            ws::Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            ws::Message::Binary(data) => Frame::Binary(data),
            ws::Message::Ping(data) => Frame::Ping(data),
            ws::Message::Pong(data) => Frame::Pong(data),
            ws::Message::Close(close) => Frame::Close(close.map(|c| CloseInfo {
                code: c.code,
                reason: c.reason.as_str().to_owned(),
            })),
        })
    }

    fn from_frame(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => ws::Message::Text(text.into()),
            Frame::Binary(data) => ws::Message::Binary(data),
            Frame::Ping(data) => ws::Message::Ping(data),
            Frame::Pong(data) => ws::Message::Pong(data),
            Frame::Close(close) => ws::Message::Close(close.map(|c| ws::CloseFrame {
                code: c.code,
                reason: c.reason.into(),
            })),
        }
    }
}

impl WireMessage for tungstenite::Message {
    fn into_frame(self) -> Option<Frame> {
        match self {
            tungstenite::Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
            tungstenite::Message::Binary(data) => Some(Frame::Binary(data)),
            tungstenite::Message::Ping(data) => Some(Frame::Ping(data)),
            tungstenite::Message::Pong(data) => Some(Frame::Pong(data)),
            tungstenite::Message::Close(close) => Some(Frame::Close(close.map(|c| CloseInfo {
                code: c.code.into(),
                reason: c.reason.as_str().to_owned(),
            }))),
            tungstenite::Message::Frame(_) => None,
        }
    }

    fn from_frame(frame: Frame) -> Self {
        use tungstenite::protocol::CloseFrame;

        match frame {
            Frame::Text(text) => tungstenite::Message::Text(text.into()),
            Frame::Binary(data) => tungstenite::Message::Binary(data),
            Frame::Ping(data) => tungstenite::Message::Ping(data),
            Frame::Pong(data) => tungstenite::Message::Pong(data),
            Frame::Close(close) => tungstenite::Message::Close(close.map(|c| CloseFrame {
                code: c.code.into(),
                reason: c.reason.into(),
            })),
        }
    }
}

/// Failure while writing to or closing a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{side} send failed: {message}")]
    Send { side: Side, message: String },
    #[error("{side} close failed: {message}")]
    Close { side: Side, message: String },
}

/// Sending half of one WebSocket, as seen by the bridge and the shutdown path.
pub trait WsChannel: Send + Sync {
    fn side(&self) -> Side;

    /// Whether frames may still be sent.
    fn is_open(&self) -> bool;

    /// Send a frame. Resolves to `Ok(false)` when the channel was already
    /// closed and the frame was dropped.
    fn send(&self, frame: Frame) -> BoxFuture<'_, Result<bool, ChannelError>>;

    /// Close with the given code and reason. No-op if already closed.
    fn close(&self, code: u16, reason: &str) -> BoxFuture<'_, Result<(), ChannelError>>;

    /// Mark closed after the peer closed, flushing any pending close reply.
    fn release(&self) -> BoxFuture<'_, ()>;
}

/// [`WsChannel`] over the sink half of a split WebSocket.
pub struct SinkChannel<S, M> {
    side: Side,
    sink: Mutex<S>,
    open: AtomicBool,
    _message: PhantomData<fn() -> M>,
}

impl<S, M> SinkChannel<S, M> {
    pub fn new(side: Side, sink: S) -> Self {
        Self {
            side,
            sink: Mutex::new(sink),
            open: AtomicBool::new(true),
            _message: PhantomData,
        }
    }
}

impl<S, M> WsChannel for SinkChannel<S, M>
where
    S: Sink<M> + Unpin + Send + 'static,
    S::Error: fmt::Display,
    M: WireMessage + 'static,
{
    fn side(&self) -> Side {
        self.side
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, frame: Frame) -> BoxFuture<'_, Result<bool, ChannelError>> {
        Box::pin(async move {
            let mut sink = self.sink.lock().await;
            // Checked under the lock so a concurrent close is never overtaken.
            if !self.open.load(Ordering::SeqCst) {
                tracing::trace!(side = %self.side, "Dropping frame for closed channel");
                return Ok(false);
            }
            sink.send(M::from_frame(frame))
                .await
                .map(|_| true)
                .map_err(|e| ChannelError::Send {
                    side: self.side,
                    message: e.to_string(),
                })
        })
    }

    fn close(&self, code: u16, reason: &str) -> BoxFuture<'_, Result<(), ChannelError>> {
        let frame = Frame::Close(Some(CloseInfo {
            code,
            reason: reason.to_owned(),
        }));
        Box::pin(async move {
            if !self.open.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            let mut sink = self.sink.lock().await;
            sink.send(M::from_frame(frame))
                .await
                .map_err(|e| ChannelError::Close {
                    side: self.side,
                    message: e.to_string(),
                })
        })
    }

    fn release(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.open.swap(false, Ordering::SeqCst) {
                return;
            }
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.close().await {
                tracing::debug!(side = %self.side, error = %e, "Channel release after peer close");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_channel::mpsc;
    use futures_util::StreamExt;

    type TestChannel = SinkChannel<mpsc::UnboundedSender<tungstenite::Message>, tungstenite::Message>;

    fn channel() -> (TestChannel, mpsc::UnboundedReceiver<tungstenite::Message>) {
        let (tx, rx) = mpsc::unbounded();
        (SinkChannel::new(Side::Upstream, tx), rx)
    }

    #[tokio::test]
    async fn forwards_binary_unmodified() {
        let (channel, mut rx) = channel();
        let sent = channel
            .send(Frame::Binary(Bytes::from_static(&[0xDE, 0xAD])))
            .await
            .unwrap();
        assert!(sent);
        assert_eq!(
            rx.next().await,
            Some(tungstenite::Message::Binary(Bytes::from_static(&[0xDE, 0xAD])))
        );
    }

    #[tokio::test]
    async fn frames_after_close_are_dropped_silently() {
        let (channel, mut rx) = channel();
        channel.close(CLOSE_GOING_AWAY, "bye").await.unwrap();
        assert!(!channel.is_open());

        let sent = channel.send(Frame::Text("late".into())).await.unwrap();
        assert!(!sent);

        match rx.next().await {
            Some(tungstenite::Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), CLOSE_GOING_AWAY);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("expected close frame, got {:?}", other),
        }
        channel.release().await;
        drop(channel);
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (channel, mut rx) = channel();
        channel.close(CLOSE_GOING_AWAY, "first").await.unwrap();
        channel.close(CLOSE_INTERNAL_ERROR, "second").await.unwrap();
        drop(channel);

        let frames: Vec<_> = rx.collect().await;
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn close_frames_convert_between_libraries() {
        let frame = Frame::Close(Some(CloseInfo {
            code: CLOSE_GOING_AWAY,
            reason: "Server shutting down".into(),
        }));
        let axum_msg = ws::Message::from_frame(frame.clone());
        assert_eq!(axum_msg.into_frame(), Some(frame.clone()));
        let tung_msg = tungstenite::Message::from_frame(frame.clone());
        assert_eq!(tung_msg.into_frame(), Some(frame));
    }

    #[test]
    fn only_text_and_binary_are_data() {
        assert!(Frame::Text("x".into()).is_data());
        assert!(Frame::Binary(Bytes::new()).is_data());
        assert!(!Frame::Ping(Bytes::new()).is_data());
        assert!(!Frame::Close(None).is_data());
    }
}
