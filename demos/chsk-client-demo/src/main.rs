//! Minimal runnable client against a running `chsk-serverd`, so the
//! subsystem can be exercised end-to-end without a consuming application.
//!
//! Connects with `auto` (WebSocket, falling back to Ajax long-poll if the
//! socket never opens), prints every `ClientEvent` it receives, and sends
//! one `demo/ping` event once the handshake completes.

use std::env;
use std::sync::Arc;

use chsk_client::{chsk_connect, ChskClient, ClientConfig, ClientEvent, ClientType, SendMode};
use chsk_protocol::JsonPacker;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let host = env::var("CHSK_HOST").unwrap_or_else(|_| "localhost:8080".to_owned());
    let client_id = env::var("CHSK_CLIENT_ID").unwrap_or_else(|_| "demo-client".to_owned());

    let mut config = ClientConfig::new(host.clone(), "/chsk", client_id);
    config.client_type = match env::var("CHSK_CLIENT_TYPE").as_deref() {
        Ok("ws") => ClientType::Ws,
        Ok("ajax") => ClientType::Ajax,
        _ => ClientType::Auto,
    };

    let (client, mut events_rx) = chsk_connect(config, Arc::new(JsonPacker));
    client.clone().connect().await;
    info!(%host, "chsk-client-demo: connecting");

    while let Some(event) = events_rx.recv().await {
        match event {
            ClientEvent::Handshake { uid, first_handshake, .. } => {
                info!(%uid, first_handshake, "chsk-client-demo: handshake complete");
                let reply = client
                    .clone()
                    .send(json!(["demo/ping", "hello"]), SendMode::WithReply {
                        timeout: std::time::Duration::from_millis(5_000),
                    })
                    .await;
                info!(?reply, "chsk-client-demo: sent demo/ping");
            }
            ClientEvent::State { transition, .. } => {
                info!(?transition, "chsk-client-demo: state changed");
            }
            ClientEvent::Msg(msg) => {
                info!(event_id = %msg.id, data = ?msg.data, "chsk-client-demo: received event");
            }
        }
    }
}
