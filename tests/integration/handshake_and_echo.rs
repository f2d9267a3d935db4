//! End-to-end: a client connects over WebSocket, receives its handshake,
//! sends an event expecting a reply, and the server's event handler replies
//! directly off the `EventMsg`'s `reply_fn`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chsk_client::{chsk_connect, CbReply, ChskClient, ClientConfig, ClientEvent, ClientType, SendMode};
use chsk_core::{ChskHub, EventHandler, Router as EventRouter, ServerConfig};
use chsk_protocol::JsonPacker;
use chsk_server::{build_router, AppState, SecuritySettings};
use serde_json::json;

async fn start_server(handler: EventHandler) -> (SocketAddr, EventRouter) {
    let (hub, recv_rx) = ChskHub::new(ServerConfig::default(), Arc::new(JsonPacker));
    let event_router = EventRouter::spawn(recv_rx, handler, None);
    let state = AppState::new(hub, SecuritySettings::default());
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    (addr, event_router)
}

#[tokio::test]
async fn client_handshakes_and_gets_an_echo_reply() {
    let handler: EventHandler = Arc::new(|msg| {
        Box::pin(async move {
            if let Some(reply_fn) = &msg.reply_fn {
                reply_fn.reply(msg.event.data.clone().unwrap_or(serde_json::Value::Null)).await;
            }
            Ok(())
        })
    });
    let (addr, event_router) = start_server(handler).await;

    let mut config = ClientConfig::new(addr.to_string(), "/chsk", "c1".to_owned());
    config.client_type = ClientType::Ws;
    let (client, mut events_rx) = chsk_connect(config, Arc::new(JsonPacker));
    client.clone().connect().await;

    let handshake = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .expect("handshake should arrive")
        .expect("channel open");
    match handshake {
        ClientEvent::Handshake { first_handshake, .. } => assert!(first_handshake),
        other => panic!("expected handshake first, got {other:?}"),
    }

    let reply = client
        .clone()
        .send(json!(["app/echo", "hello"]), SendMode::WithReply { timeout: Duration::from_secs(2) })
        .await
        .expect("send expecting a reply always resolves to Some");
    match reply {
        CbReply::Value(v) => assert_eq!(v, json!("hello")),
        other => panic!("unexpected reply: {other:?}"),
    }

    event_router.stop();
    event_router.join().await;
}
