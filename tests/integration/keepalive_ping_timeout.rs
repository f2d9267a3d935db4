//! End-to-end: a WebSocket peer that accepts the handshake but never
//! answers a `chsk/ws-ping` forces the client to cycle the socket with
//! `CloseReason::WsPingTimeout` and reconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chsk_client::{chsk_connect, ChskClient, ClientConfig, ClientEvent, ClientType, CloseReason};
use chsk_protocol::control::server_to_client;
use chsk_protocol::{write_wire, Envelope, Event, JsonPacker};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

/// A bare-bones WS peer: completes the handshake, sends the `chsk/handshake`
/// frame, then silently drops every frame it receives — in particular it
/// never answers a `chsk/ws-ping`, unlike a real `chsk-server`.
async fn start_silent_ws_peer() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { return };
                let (mut sink, mut stream) = ws.split();
                let handshake = Event::new(server_to_client::HANDSHAKE, Some(json!(["u1", true, serde_json::Value::Null])));
                let wire = write_wire(&JsonPacker, &Envelope::new(handshake.to_value()));
                if sink.send(Message::Text(wire.into())).await.is_err() {
                    return;
                }
                while stream.next().await.is_some() {
                    // Deliberately unresponsive: never reply to anything,
                    // including a `chsk/ws-ping`.
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn unanswered_keepalive_ping_triggers_reconnect() {
    let addr = start_silent_ws_peer().await;

    let mut config = ClientConfig::new(addr.to_string(), "/chsk", "c1".to_owned());
    config.client_type = ClientType::Ws;
    config.ws_kalive_ms = Duration::from_millis(40);
    config.ws_kalive_ping_timeout_ms = Duration::from_millis(40);
    config.backoff_ms_fn = Arc::new(|_retry| Duration::from_millis(15));
    let (client, mut events_rx) = chsk_connect(config, Arc::new(JsonPacker));
    client.clone().connect().await;

    match tokio::time::timeout(Duration::from_secs(2), events_rx.recv()).await {
        Ok(Some(ClientEvent::Handshake { .. })) => {}
        other => panic!("expected initial handshake, got {other:?}"),
    }

    let mut saw_ping_timeout_close = false;
    for _ in 0..50 {
        match tokio::time::timeout(Duration::from_millis(500), events_rx.recv()).await {
            Ok(Some(ClientEvent::State { new, .. })) => {
                if matches!(new.last_close.as_ref().map(|c| c.reason), Some(CloseReason::WsPingTimeout)) {
                    saw_ping_timeout_close = true;
                    break;
                }
            }
            Ok(Some(_)) => continue,
            Ok(None) => panic!("receive channel closed before a ping timeout was observed"),
            Err(_timeout) => continue,
        }
    }
    assert!(saw_ping_timeout_close, "client never reported a ws-ping-timeout close");
}
