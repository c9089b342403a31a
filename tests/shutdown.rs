//! Graceful shutdown tests.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;

mod common;

#[tokio::test]
async fn test_shutdown_drains_sessions_and_connections() {
    let mut upstream = common::start_ws_upstream().await;
    let gateway = common::spawn_gateway(common::test_config(upstream.addr)).await;

    let (mut first, _) = connect_async(gateway.ws("/comfyui/ws?clientId=1")).await.unwrap();
    let (mut second, _) = connect_async(gateway.ws("/comfyui/ws?clientId=2")).await.unwrap();
    gateway.wait_for_open_sessions(2).await;

    // An idle keep-alive connection that never sends a request.
    let mut idle = TcpStream::connect(gateway.addr).await.unwrap();
    let registry = Arc::clone(&gateway.registry);
    common::wait_until("idle connection to be tracked", move || registry.connection_count() >= 1).await;

    let exit = Arc::new(common::RecordingExit::default());
    let report = gateway.sequencer(Arc::clone(&exit)).run(0).await.unwrap();

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.sessions_closed, 2);
    assert!(report.connections_terminated >= 1);
    assert_eq!(*exit.codes.lock().unwrap(), vec![0]);

    for client in [&mut first, &mut second] {
        let (code, reason) = common::next_close(client).await;
        assert_eq!(code, 1001);
        assert_eq!(reason, "Server shutting down");
    }
    for _ in 0..2 {
        let (code, reason) = upstream.next_close().await;
        assert_eq!(code, 1001);
        assert_eq!(reason, "Server shutting down");
    }

    let mut buf = [0u8; 16];
    let read = common::within(idle.read(&mut buf)).await;
    assert!(matches!(read, Ok(0) | Err(_)), "idle connection still open");

    gateway.wait_for_no_sessions().await;
    assert_eq!(gateway.registry.connection_count(), 0);
}

#[tokio::test]
async fn test_no_upgrades_after_shutdown() {
    let upstream = common::start_ws_upstream().await;
    let gateway = common::spawn_gateway(common::test_config(upstream.addr)).await;

    let exit = Arc::new(common::RecordingExit::default());
    gateway.sequencer(Arc::clone(&exit)).run(0).await.unwrap();

    let attempt = tokio::time::timeout(
        Duration::from_secs(2),
        connect_async(gateway.ws("/comfyui/ws")),
    )
    .await
    .unwrap();
    assert!(attempt.is_err(), "upgrade accepted during shutdown");
    assert_eq!(gateway.registry.session_count(), 0);
}

#[tokio::test]
async fn test_shutdown_runs_once() {
    let upstream = common::start_ws_upstream().await;
    let gateway = common::spawn_gateway(common::test_config(upstream.addr)).await;

    let (_client, _) = connect_async(gateway.ws("/comfyui/ws")).await.unwrap();
    gateway.wait_for_open_sessions(1).await;

    let exit = Arc::new(common::RecordingExit::default());
    let first = gateway.sequencer(Arc::clone(&exit));
    let second = gateway.sequencer(Arc::clone(&exit));

    let (a, b) = tokio::join!(first.run(0), second.run(1));

    assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
    assert_eq!(exit.codes.lock().unwrap().len(), 1);
    assert!(gateway.shutdown.is_shutting_down());
}

#[tokio::test]
async fn test_connections_endpoint_reports_shutdown() {
    let gateway = common::spawn_gateway(common::test_config(common::unused_addr().await)).await;

    // Keep one connection open across the flag flip.
    let client = common::http_client();
    let before: serde_json::Value = client
        .get(gateway.http("/api/system/connections"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before["shuttingDown"], false);

    assert!(gateway.shutdown.trigger());
    assert!(!gateway.shutdown.trigger());

    // The listener is gone, but the pooled keep-alive connection still works.
    let after: serde_json::Value = client
        .get(gateway.http("/api/system/connections"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["shuttingDown"], true);
}
