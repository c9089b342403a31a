//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use comfy_gateway::config::GatewayConfig;
use comfy_gateway::http::HttpServer;
use comfy_gateway::lifecycle::{Exit, Shutdown, ShutdownSequencer};
use comfy_gateway::net::Listener;
use comfy_gateway::session::{Registry, SessionState};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Gateway config pointed at `upstream`, with limits relaxed for tests.
pub fn test_config(upstream: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstream.url = format!("http://{}", upstream);
    config.upstream.connect_timeout_secs = 2;
    config.rate_limit.enabled = false;
    config.api_rate_limit.enabled = false;
    config.shutdown.grace_period_ms = 50;
    config.shutdown.watchdog_ms = 5_000;
    config.storage.data_dir = std::env::temp_dir()
        .join(format!("comfy-gateway-it-{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();
    config
}

/// A gateway running on an ephemeral port.
pub struct Gateway {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub shutdown: Shutdown,
    pub config: GatewayConfig,
}

impl Gateway {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, path_and_query: &str) -> String {
        format!("ws://{}{}", self.addr, path_and_query)
    }

    pub fn sequencer(&self, exit: Arc<RecordingExit>) -> ShutdownSequencer {
        ShutdownSequencer::new(
            self.shutdown.clone(),
            Arc::clone(&self.registry),
            self.config.shutdown.clone(),
            exit,
        )
    }

    /// Wait until `count` sessions have finished dialing the upstream.
    pub async fn wait_for_open_sessions(&self, count: usize) {
        let registry = Arc::clone(&self.registry);
        wait_until("sessions to open", move || {
            registry
                .snapshot()
                .sessions
                .iter()
                .filter(|s| s.state() == SessionState::Open)
                .count()
                == count
        })
        .await;
    }

    pub async fn wait_for_no_sessions(&self) {
        let registry = Arc::clone(&self.registry);
        wait_until("sessions to unregister", move || registry.session_count() == 0).await;
    }
}

pub async fn spawn_gateway(config: GatewayConfig) -> Gateway {
    let registry = Arc::new(Registry::new());
    let shutdown = Shutdown::new();

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, config.listener.max_connections);

    let server = HttpServer::new(config.clone(), Arc::clone(&registry), shutdown.clone());
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });

    Gateway {
        addr,
        registry,
        shutdown,
        config,
    }
}

/// HTTP client that never goes through a system proxy.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Records exit codes instead of ending the test process.
#[derive(Default)]
pub struct RecordingExit {
    pub codes: Mutex<Vec<i32>>,
}

impl Exit for RecordingExit {
    fn exit(&self, code: i32) {
        self.codes.lock().unwrap().push(code);
    }
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Start a mock HTTP upstream that reports each request head and answers
/// with `body`.
pub async fn start_recording_backend(body: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (heads_tx, heads) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let heads_tx = heads_tx.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let _ = heads_tx.send(String::from_utf8_lossy(&buf).into_owned());

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nX-Upstream: mock\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, heads)
}

/// Mock upstream WebSocket server.
///
/// Records the request URI of every handshake and every message it reads,
/// echoes data messages back, and closes all connections on request.
pub struct WsUpstream {
    pub addr: SocketAddr,
    pub uris: mpsc::UnboundedReceiver<String>,
    pub received: mpsc::UnboundedReceiver<Message>,
    close_all: watch::Sender<bool>,
}

impl WsUpstream {
    pub fn close_all(&self) {
        self.close_all.send_replace(true);
    }

    /// Next message the upstream read, skipping control frames.
    pub async fn next_data(&mut self) -> Message {
        loop {
            let message = within(self.received.recv()).await.expect("upstream closed");
            if message.is_text() || message.is_binary() {
                return message;
            }
        }
    }

    /// Wait for the close frame the upstream read and return its code and reason.
    pub async fn next_close(&mut self) -> (u16, String) {
        loop {
            let message = within(self.received.recv()).await.expect("upstream closed");
            if let Message::Close(frame) = message {
                return frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                    .unwrap_or((1005, String::new()));
            }
        }
    }
}

pub async fn start_ws_upstream() -> WsUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uris_tx, uris) = mpsc::unbounded_channel();
    let (received_tx, received) = mpsc::unbounded_channel();
    let (close_all, close_rx) = watch::channel(false);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let uris_tx = uris_tx.clone();
            let received_tx = received_tx.clone();
            let mut close_rx = close_rx.clone();

            tokio::spawn(async move {
                let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    let _ = uris_tx.send(request.uri().to_string());
                    Ok(response)
                };
                let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                    return;
                };

                loop {
                    tokio::select! {
                        message = ws.next() => match message {
                            Some(Ok(message)) => {
                                let _ = received_tx.send(message.clone());
                                if message.is_text() || message.is_binary() {
                                    let _ = ws.send(message).await;
                                }
                            }
                            _ => break,
                        },
                        _ = async { let _ = close_rx.wait_for(|close| *close).await; } => {
                            let _ = ws.close(None).await;
                            while let Some(Ok(message)) = ws.next().await {
                                let _ = received_tx.send(message);
                            }
                            break;
                        }
                    }
                }
            });
        }
    });

    WsUpstream {
        addr,
        uris,
        received,
        close_all,
    }
}

/// Read from a client socket until a close frame arrives.
pub async fn next_close(client: &mut Client) -> (u16, String) {
    within(async {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Close(frame)) => {
                    return frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((1005, String::new()));
                }
                Ok(_) => continue,
                Err(e) => panic!("client read failed before close: {e}"),
            }
        }
        panic!("client stream ended without a close frame");
    })
    .await
}

/// Next data message a client socket receives.
pub async fn next_data(client: &mut Client) -> Message {
    within(async {
        loop {
            match client.next().await {
                Some(Ok(message)) if message.is_text() || message.is_binary() => return message,
                Some(Ok(_)) => continue,
                other => panic!("expected a data frame, got {other:?}"),
            }
        }
    })
    .await
}

pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
