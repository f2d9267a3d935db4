//! End-to-end: two sends issued close together land in the same flush
//! window and are delivered to an Ajax long-poll client as one batch —
//! both arrive close together, not spaced out across separate poll cycles.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chsk_client::{chsk_connect, ChskClient, ClientConfig, ClientEvent, ClientType};
use chsk_core::{ChskHub, EventHandler, Router as EventRouter, ServerConfig};
use chsk_protocol::JsonPacker;
use chsk_server::{build_router, AppState, SecuritySettings};
use serde_json::json;

async fn start_server(config: ServerConfig) -> (SocketAddr, Arc<ChskHub>, EventRouter) {
    let (hub, recv_rx) = ChskHub::new(config, Arc::new(JsonPacker));
    let handler: EventHandler = Arc::new(|_msg| Box::pin(async { Ok(()) }));
    let event_router = EventRouter::spawn(recv_rx, handler, None);
    let state = AppState::new(hub.clone(), SecuritySettings::default());
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    (addr, hub, event_router)
}

#[tokio::test]
async fn two_close_sends_batch_into_one_delivery() {
    let config = ServerConfig {
        send_buf_ms_ajax: Duration::from_millis(60),
        ..ServerConfig::default()
    };
    let (addr, hub, event_router) = start_server(config).await;

    let mut config = ClientConfig::new(addr.to_string(), "/chsk", "c1".to_owned());
    config.client_type = ClientType::Ajax;
    let (client, mut events_rx) = chsk_connect(config, Arc::new(JsonPacker));
    client.clone().connect().await;

    match tokio::time::timeout(Duration::from_secs(2), events_rx.recv()).await {
        Ok(Some(ClientEvent::Handshake { .. })) => {}
        other => panic!("expected handshake, got {other:?}"),
    }

    hub.send("c1", json!(["app/one", 1]), false).await.expect("buffered send");
    hub.send("c1", json!(["app/two", 2]), false).await.expect("buffered send");

    let start = Instant::now();
    let first = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .expect("first event should arrive")
        .expect("channel open");
    let first_elapsed = start.elapsed();
    let second = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .expect("second event should arrive")
        .expect("channel open");
    let second_elapsed = start.elapsed();

    let (ClientEvent::Msg(first), ClientEvent::Msg(second)) = (first, second) else {
        panic!("expected two Msg events");
    };
    assert_eq!(first.id, "app/one");
    assert_eq!(second.id, "app/two");
    assert!(
        second_elapsed - first_elapsed < Duration::from_millis(30),
        "batched events should arrive back-to-back from the same poll response, not {first_elapsed:?} apart from {second_elapsed:?}"
    );

    event_router.stop();
    event_router.join().await;
}
