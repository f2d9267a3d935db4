use std::env;
use std::sync::Arc;
use std::time::Duration;

use chsk_core::{ChskHub, EventHandler, Router as EventRouter, ServerConfig};
use chsk_protocol::JsonPacker;
use chsk_server::{build_router, AppState, SecuritySettings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let config = config_from_env();

    let (hub, recv_rx) = ChskHub::new(config, Arc::new(JsonPacker));
    let handler: EventHandler = Arc::new(|msg| {
        Box::pin(async move {
            info!(uid = msg.uid, cid = msg.cid, event = msg.event.id, "chsk: received event");
            Ok(())
        })
    });
    let event_router = EventRouter::spawn(recv_rx, handler, None);

    let state = AppState::new(hub, SecuritySettings::default());
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "chsk server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    event_router.stop();
    event_router.join().await;
    info!("chsk server shut down gracefully");
}

fn config_from_env() -> ServerConfig {
    fn millis(name: &str, default: Duration) -> Duration {
        env::var(name)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    let defaults = ServerConfig::default();
    ServerConfig {
        recv_buf_or_n: env::var("CHSK_RECV_BUF_OR_N")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.recv_buf_or_n),
        ws_kalive_ms: millis("CHSK_WS_KALIVE_MS", defaults.ws_kalive_ms),
        lp_timeout_ms: millis("CHSK_LP_TIMEOUT_MS", defaults.lp_timeout_ms),
        send_buf_ms_ws: millis("CHSK_SEND_BUF_MS_WS", defaults.send_buf_ms_ws),
        send_buf_ms_ajax: millis("CHSK_SEND_BUF_MS_AJAX", defaults.send_buf_ms_ajax),
        ms_allow_reconnect_before_close_ws: millis(
            "CHSK_RECONNECT_GRACE_MS_WS",
            defaults.ms_allow_reconnect_before_close_ws,
        ),
        ms_allow_reconnect_before_close_ajax: millis(
            "CHSK_RECONNECT_GRACE_MS_AJAX",
            defaults.ms_allow_reconnect_before_close_ajax,
        ),
        allowed_origins: defaults.allowed_origins,
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        () = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
