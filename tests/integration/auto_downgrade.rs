//! End-to-end: an `auto` client whose WebSocket upgrade is always rejected
//! (simulating a proxy that blocks `Upgrade: websocket`) falls back to Ajax
//! long-polling exactly once and stays there.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chsk_client::{chsk_connect, ChskClient, ClientConfig, ClientEvent, ClientType};
use chsk_core::{ChskHub, EventHandler, Router as EventRouter, ServerConfig};
use chsk_protocol::JsonPacker;
use chsk_server::{build_router, AppState, SecuritySettings};

async fn start_server() -> (SocketAddr, EventRouter) {
    let (hub, recv_rx) = ChskHub::new(ServerConfig::default(), Arc::new(JsonPacker));
    let handler: EventHandler = Arc::new(|_msg| Box::pin(async { Ok(()) }));
    let event_router = EventRouter::spawn(recv_rx, handler, None);
    let security = SecuritySettings {
        // Simulates a proxy/load-balancer that strips or blocks websocket
        // upgrades: any request carrying an `Upgrade` header is refused,
        // plain Ajax GET/POST requests are unaffected.
        authorized_fn: Some(Arc::new(|parts| !parts.headers.contains_key("upgrade"))),
        ..SecuritySettings::default()
    };
    let state = AppState::new(hub, security);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    (addr, event_router)
}

#[tokio::test]
async fn auto_client_downgrades_to_ajax_when_ws_is_blocked() {
    let (addr, event_router) = start_server().await;

    let mut config = ClientConfig::new(addr.to_string(), "/chsk", "c1".to_owned());
    config.client_type = ClientType::Auto;
    config.backoff_ms_fn = Arc::new(|_retry| Duration::from_millis(15));
    let (client, mut events_rx) = chsk_connect(config, Arc::new(JsonPacker));
    client.clone().connect().await;

    let mut handshaked = false;
    for _ in 0..50 {
        match tokio::time::timeout(Duration::from_millis(500), events_rx.recv()).await {
            Ok(Some(ClientEvent::Handshake { .. })) => {
                handshaked = true;
                break;
            }
            Ok(Some(_)) => continue,
            Ok(None) => panic!("receive channel closed before a handshake arrived"),
            Err(_timeout) => continue,
        }
    }
    assert!(handshaked, "auto client should have downgraded to ajax and handshaken");
    assert!(client.state().await.open);

    event_router.stop();
    event_router.join().await;
}
