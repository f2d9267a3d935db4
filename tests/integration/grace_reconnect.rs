//! End-to-end: a WebSocket client that drops and reconnects within the
//! server's grace window never triggers `chsk/uidport-close` — the
//! scheduled detach's CAS snapshot goes stale once the reconnect lands.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chsk_client::{chsk_connect, ChskClient, ClientConfig, ClientEvent, ClientType};
use chsk_core::{ChskHub, EventHandler, Router as EventRouter, ServerConfig};
use chsk_protocol::control::client_to_server;
use chsk_protocol::JsonPacker;
use chsk_server::{build_router, AppState, SecuritySettings};

async fn start_server(config: ServerConfig, uidport_closes: Arc<AtomicUsize>) -> (SocketAddr, EventRouter) {
    let (hub, recv_rx) = ChskHub::new(config, Arc::new(JsonPacker));
    let handler: EventHandler = Arc::new(move |msg| {
        let uidport_closes = uidport_closes.clone();
        Box::pin(async move {
            if msg.event.id == client_to_server::UIDPORT_CLOSE {
                uidport_closes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
    });
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
async fn reconnect_within_grace_window_suppresses_uidport_close() {
    let uidport_closes = Arc::new(AtomicUsize::new(0));
    let config = ServerConfig {
        ms_allow_reconnect_before_close_ws: Duration::from_millis(300),
        ..ServerConfig::default()
    };
    let (addr, event_router) = start_server(config, uidport_closes.clone()).await;

    let mut config = ClientConfig::new(addr.to_string(), "/chsk", "c1".to_owned());
    config.client_type = ClientType::Ws;
    let (client, mut events_rx) = chsk_connect(config, Arc::new(JsonPacker));
    client.clone().connect().await;

    match tokio::time::timeout(Duration::from_secs(2), events_rx.recv()).await {
        Ok(Some(ClientEvent::Handshake { first_handshake, .. })) => assert!(first_handshake),
        other => panic!("expected first handshake, got {other:?}"),
    }

    client.break_connection();
    // Well inside the 300ms grace window.
    tokio::time::sleep(Duration::from_millis(30)).await;
    client.clone().reconnect().await;

    let mut saw_second_handshake = false;
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_millis(500), events_rx.recv()).await {
            Ok(Some(ClientEvent::Handshake { first_handshake, .. })) => {
                assert!(!first_handshake, "reconnect handshake must not re-report first_handshake");
                saw_second_handshake = true;
                break;
            }
            Ok(Some(_)) => continue,
            other => panic!("expected a second handshake, got {other:?}"),
        }
    }
    assert!(saw_second_handshake, "client should have reconnected and handshaken again");

    // Give the grace-close task time to fire and observe it was a no-op.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(uidport_closes.load(Ordering::SeqCst), 0, "reconnect before grace deadline must suppress uidport-close");

    event_router.stop();
    event_router.join().await;
}
