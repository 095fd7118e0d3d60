//! End-to-end tests for the WebSocket transport.
//!
//! Each test starts a real server on a loopback port and drives it with a
//! `tokio-tungstenite` client.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hookwire::{
    CandidateRange, Engine, Hook, HookName, LoggerConfig, OriginPolicy, ServerDetail, Transport,
    WsServer,
};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ORIGIN: &str = "https://example.com";

/// A port that was free a moment ago.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_server() -> WsServer {
    let port = free_port();
    let engine = Engine::new("ws-test", &LoggerConfig::silent());
    let policy = OriginPolicy::new(&[ORIGIN, "https://*.example.org"]).unwrap();
    WsServer::start(engine, CandidateRange::new(port, port), policy)
        .await
        .unwrap()
}

async fn connect(port: u16, origin: Option<&'static str>) -> Client {
    let mut request = format!("ws://127.0.0.1:{port}/?v=1&encoding=json")
        .into_client_request()
        .unwrap();
    if let Some(origin) = origin {
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_static(origin));
    }
    let (client, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    client
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("Timed out waiting for message")
        .expect("Stream ended")
        .expect("Read error")
}

async fn next_json(client: &mut Client) -> Value {
    match next_message(client).await {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("Expected text, got: {other:?}"),
    }
}

async fn next_close_code(client: &mut Client) -> u16 {
    match next_message(client).await {
        Message::Close(Some(frame)) => u16::from(frame.code),
        other => panic!("Expected close frame, got: {other:?}"),
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_ready_then_default_response() {
    let server = start_server().await;
    assert_eq!(
        server.engine().detail().unwrap(),
        Some(ServerDetail::Port(server.port().unwrap()))
    );
    let mut client = connect(server.port().unwrap(), Some(ORIGIN)).await;

    let ready = next_json(&mut client).await;
    assert_eq!(ready["cmd"], "DISPATCH");
    assert_eq!(ready["evt"], "READY");
    assert_eq!(ready["data"]["v"], 1);

    send_json(
        &mut client,
        json!({"cmd": "AUTHORIZE", "nonce": "n1", "args": {"scopes": ["identify"], "client_id": "123"}}),
    )
    .await;
    assert_eq!(
        next_json(&mut client).await,
        json!({"cmd": "AUTHORIZE", "data": null, "evt": null, "nonce": "n1"})
    );

    send_json(
        &mut client,
        json!({"cmd": "GUILD_TEMPLATE_BROWSER", "nonce": "n2", "args": {"code": "abc"}}),
    )
    .await;
    assert_eq!(
        next_json(&mut client).await,
        json!({"cmd": "GUILD_TEMPLATE_BROWSER", "data": {"code": "abc", "guildTemplate": {"code": "abc"}}, "nonce": "n2"})
    );

    server.destroy().await.unwrap();
}

#[tokio::test]
async fn test_hook_receives_origin_and_closes_with_status() {
    let server = start_server().await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let hook = Hook::new(move |message, origin| {
        let tx = tx.clone();
        async move {
            let _ = tx.send((message.nonce.clone(), origin));
            Ok(Some(4003))
        }
    });
    server
        .engine()
        .add_hook(HookName::DeepLinkChannel, hook)
        .unwrap();

    let mut client = connect(server.port().unwrap(), Some("https://app.example.org")).await;
    next_json(&mut client).await;

    send_json(
        &mut client,
        json!({"cmd": "DEEP_LINK", "nonce": "n3", "args": {"type": "CHANNEL", "params": {
            "guildId": "1", "channelId": "2", "search": "?x=1", "fingerprint": "fp"
        }}}),
    )
    .await;

    assert_eq!(next_close_code(&mut client).await, 4003);
    let (nonce, origin) = rx.recv().await.unwrap();
    assert_eq!(nonce, "n3");
    assert_eq!(origin.as_deref(), Some("https://app.example.org"));

    server.destroy().await.unwrap();
}

#[tokio::test]
async fn test_plain_text_closes_with_invalid_payload() {
    let server = start_server().await;
    let mut client = connect(server.port().unwrap(), Some(ORIGIN)).await;
    next_json(&mut client).await;

    client.send(Message::Text("hello".into())).await.unwrap();
    match next_message(&mut client).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1007);
            assert!(frame.reason.contains("hello"));
        }
        other => panic!("Expected close frame, got: {other:?}"),
    }

    server.destroy().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_command_and_binary() {
    let server = start_server().await;

    let mut client = connect(server.port().unwrap(), Some(ORIGIN)).await;
    next_json(&mut client).await;
    send_json(&mut client, json!({"cmd": "SUBSCRIBE", "nonce": "n", "args": {}})).await;
    assert_eq!(next_close_code(&mut client).await, 1003);

    let mut client = connect(server.port().unwrap(), Some(ORIGIN)).await;
    next_json(&mut client).await;
    client.send(Message::Binary(vec![0xff, 0x00, 0x01])).await.unwrap();
    assert_eq!(next_close_code(&mut client).await, 1002);

    server.destroy().await.unwrap();
}

#[tokio::test]
async fn test_rejected_origins_close_with_policy_violation() {
    let server = start_server().await;

    for origin in [Some("https://evil.com"), Some("https://discord.com"), None] {
        let mut client = connect(server.port().unwrap(), origin).await;
        assert_eq!(next_close_code(&mut client).await, 1008, "origin {origin:?}");
    }

    server.destroy().await.unwrap();
}

#[tokio::test]
async fn test_toggle_applies_to_live_connections() {
    let server = start_server().await;
    server
        .engine()
        .add_hook(HookName::SetActivity, Hook::new(|_, _| async { Ok(Some(4000)) }))
        .unwrap();
    server
        .engine()
        .toggle_hooks(HookName::SetActivity, Some(false))
        .unwrap();

    let mut client = connect(server.port().unwrap(), Some(ORIGIN)).await;
    next_json(&mut client).await;

    let activity = json!({"cmd": "SET_ACTIVITY", "nonce": "n4", "args": {"pid": 1}});
    send_json(&mut client, activity.clone()).await;
    assert_eq!(next_json(&mut client).await["nonce"], "n4");

    server
        .engine()
        .toggle_hooks(HookName::SetActivity, None)
        .unwrap();
    send_json(&mut client, activity).await;
    assert_eq!(next_close_code(&mut client).await, 4000);

    server.destroy().await.unwrap();
}

#[tokio::test]
async fn test_client_leaving_during_hook_keeps_server_alive() {
    let server = start_server().await;
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
    let hook = Hook::new(move |message, _| {
        let started_tx = started_tx.clone();
        async move {
            let _ = started_tx.send(());
            if message.nonce == "slow" {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            Ok(None)
        }
    });
    server.engine().add_hook(HookName::Authorize, hook).unwrap();

    let mut client = connect(server.port().unwrap(), Some(ORIGIN)).await;
    next_json(&mut client).await;
    send_json(&mut client, json!({"cmd": "AUTHORIZE", "nonce": "slow", "args": {}})).await;
    started_rx.recv().await.unwrap();
    drop(client);

    // Let the pending fan-in finish against the closed connection
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut client = connect(server.port().unwrap(), Some(ORIGIN)).await;
    assert_eq!(next_json(&mut client).await["evt"], "READY");
    send_json(&mut client, json!({"cmd": "AUTHORIZE", "nonce": "fast", "args": {}})).await;
    assert_eq!(next_json(&mut client).await["nonce"], "fast");
    assert!(!server.is_destroyed());

    server.destroy().await.unwrap();
}

#[tokio::test]
async fn test_destroy_closes_connections_and_releases_port() {
    let server = start_server().await;
    let port = server.port().unwrap();
    let mut client = connect(port, Some(ORIGIN)).await;
    next_json(&mut client).await;

    server.destroy().await.unwrap();
    assert_eq!(next_close_code(&mut client).await, 1001);
    assert!(server.is_destroyed());
    assert!(server.destroy().await.is_err());
    assert!(server.port().is_err());
    assert!(server.name().is_err());
    assert!(server.stop_server().await.is_err());
    assert!(server.engine().logger().is_err());

    // The port can be bound again
    let _listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
}

#[tokio::test]
async fn test_busy_port_is_skipped() {
    let held = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let taken = held.local_addr().unwrap().port();
    let Some(next) = taken.checked_add(1) else {
        return;
    };
    if std::net::TcpListener::bind(("127.0.0.1", next)).is_err() {
        // Neighbouring port is used by something else on this machine
        return;
    }

    let engine = Engine::new("ws-test", &LoggerConfig::silent());
    let policy = OriginPolicy::new(&[ORIGIN]).unwrap();
    let server = WsServer::start(engine, CandidateRange::new(taken, next), policy)
        .await
        .unwrap();
    assert_eq!(server.port().unwrap(), next);
    server.destroy().await.unwrap();
}
