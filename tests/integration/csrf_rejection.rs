//! End-to-end: a WebSocket connect attempt without a valid CSRF token is
//! rejected by `chsk-server`'s preflight check before the upgrade even
//! completes, while the same client configured with the right token opens
//! normally.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chsk_client::{chsk_connect, ChskClient, ClientConfig, ClientEvent, ClientType};
use chsk_core::{ChskHub, EventHandler, Router as EventRouter, ServerConfig};
use chsk_protocol::JsonPacker;
use chsk_server::{build_router, AppState, SecuritySettings};

const EXPECTED_TOKEN: &str = "s3cret-token";

async fn start_server() -> (SocketAddr, EventRouter) {
    let (hub, recv_rx) = ChskHub::new(ServerConfig::default(), Arc::new(JsonPacker));
    let handler: EventHandler = Arc::new(|_msg| Box::pin(async { Ok(()) }));
    let event_router = EventRouter::spawn(recv_rx, handler, None);
    let security = SecuritySettings {
        csrf_token_fn: Some(Arc::new(|_headers, _params| Some(EXPECTED_TOKEN.to_owned()))),
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

fn fast_retry_config(addr: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::new(addr.to_string(), "/chsk", "c1".to_owned());
    config.client_type = ClientType::Ws;
    config.backoff_ms_fn = Arc::new(|_retry| Duration::from_millis(15));
    config
}

#[tokio::test]
async fn missing_csrf_token_never_opens() {
    let (addr, event_router) = start_server().await;

    let config = fast_retry_config(addr);
    let (client, mut events_rx) = chsk_connect(config, Arc::new(JsonPacker));
    client.clone().connect().await;

    // No handshake should ever arrive; the connection is rejected at preflight.
    let outcome = tokio::time::timeout(Duration::from_millis(400), events_rx.recv()).await;
    match outcome {
        Err(_timeout) => {}
        Ok(Some(ClientEvent::State { new, .. })) => assert!(!new.open),
        Ok(other) => panic!("unexpected event before any successful open: {other:?}"),
    }
    assert!(!client.state().await.open);

    event_router.stop();
    event_router.join().await;
}

#[tokio::test]
async fn matching_csrf_token_opens_normally() {
    let (addr, event_router) = start_server().await;

    let mut config = fast_retry_config(addr);
    config.csrf_token = Some(EXPECTED_TOKEN.to_owned());
    let (client, mut events_rx) = chsk_connect(config, Arc::new(JsonPacker));
    client.clone().connect().await;

    match tokio::time::timeout(Duration::from_secs(2), events_rx.recv()).await {
        Ok(Some(ClientEvent::Handshake { .. })) => {}
        other => panic!("expected handshake with a correct csrf token, got {other:?}"),
    }
    assert!(client.state().await.open);

    event_router.stop();
    event_router.join().await;
}
