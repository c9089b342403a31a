//! WebSocket bridge tests: passthrough, teardown and dial failures.

use futures_util::SinkExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

mod common;

#[tokio::test]
async fn test_query_and_binary_passthrough() {
    let mut upstream = common::start_ws_upstream().await;
    let gateway = common::spawn_gateway(common::test_config(upstream.addr)).await;

    let (mut client, _) = connect_async(gateway.ws("/comfyui/ws?clientId=abc&mode=x%20y"))
        .await
        .unwrap();
    gateway.wait_for_open_sessions(1).await;

    let uri = common::within(upstream.uris.recv()).await.unwrap();
    assert_eq!(uri, "/ws?clientId=abc&mode=x%20y");

    let payload = vec![0u8, 1, 2, 255];
    client.send(Message::Binary(payload.clone().into())).await.unwrap();
    assert_eq!(upstream.next_data().await, Message::Binary(payload.clone().into()));
    // The mock echoes, so the client sees the upstream's frame unchanged.
    assert_eq!(common::next_data(&mut client).await, Message::Binary(payload.into()));

    client.send(Message::Text("{\"type\":\"status\"}".into())).await.unwrap();
    assert_eq!(upstream.next_data().await, Message::Text("{\"type\":\"status\"}".into()));
    assert_eq!(
        common::next_data(&mut client).await,
        Message::Text("{\"type\":\"status\"}".into())
    );

    assert_eq!(gateway.registry.session_count(), 1);
}

#[tokio::test]
async fn test_frame_order_is_preserved() {
    let mut upstream = common::start_ws_upstream().await;
    let gateway = common::spawn_gateway(common::test_config(upstream.addr)).await;

    let (mut client, _) = connect_async(gateway.ws("/comfyui/ws")).await.unwrap();
    gateway.wait_for_open_sessions(1).await;

    for i in 0..50 {
        client.send(Message::Text(i.to_string().into())).await.unwrap();
    }
    for i in 0..50 {
        assert_eq!(upstream.next_data().await, Message::Text(i.to_string().into()));
    }
    for i in 0..50 {
        assert_eq!(common::next_data(&mut client).await, Message::Text(i.to_string().into()));
    }
}

#[tokio::test]
async fn test_upstream_close_closes_client() {
    let upstream = common::start_ws_upstream().await;
    let gateway = common::spawn_gateway(common::test_config(upstream.addr)).await;

    let (mut client, _) = connect_async(gateway.ws("/comfyui/ws")).await.unwrap();
    gateway.wait_for_open_sessions(1).await;

    upstream.close_all();

    let (code, reason) = common::next_close(&mut client).await;
    assert_eq!(code, 1001);
    assert_eq!(reason, "Peer closed");
    gateway.wait_for_no_sessions().await;
}

#[tokio::test]
async fn test_client_close_closes_upstream() {
    let mut upstream = common::start_ws_upstream().await;
    let gateway = common::spawn_gateway(common::test_config(upstream.addr)).await;

    let (mut client, _) = connect_async(gateway.ws("/comfyui/ws")).await.unwrap();
    gateway.wait_for_open_sessions(1).await;

    client.close(None).await.unwrap();

    let (code, reason) = upstream.next_close().await;
    assert_eq!(code, 1001);
    assert_eq!(reason, "Peer closed");
    gateway.wait_for_no_sessions().await;
}

#[tokio::test]
async fn test_unreachable_upstream_closes_client_with_error() {
    let gateway = common::spawn_gateway(common::test_config(common::unused_addr().await)).await;

    let (mut client, _) = connect_async(gateway.ws("/comfyui/ws?clientId=abc")).await.unwrap();

    let (code, reason) = common::next_close(&mut client).await;
    assert_eq!(code, 1011);
    assert_eq!(reason, "Upstream unreachable");
    gateway.wait_for_no_sessions().await;
}

#[tokio::test]
async fn test_plain_get_on_ws_path_is_not_proxied() {
    let upstream = common::start_ws_upstream().await;
    let gateway = common::spawn_gateway(common::test_config(upstream.addr)).await;

    let res = common::http_client()
        .get(gateway.http("/comfyui/ws"))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_client_error());
    assert_eq!(gateway.registry.session_count(), 0);
}
