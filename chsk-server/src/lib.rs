//! HTTP/WebSocket adapter binding a `chsk-core` hub to `axum` (spec §4.F).
//!
//! Mirrors the teacher's `server::build_router` (`services/server/src/lib.rs`):
//! one `Router::new()` chain of routes closed over a cloneable `AppState`,
//! plus the ambient `/healthz`/`/readyz` endpoints every service in the
//! workspace carries regardless of its feature set.

pub mod http;
pub mod response;
pub mod security;
pub mod state;
pub mod wire;

pub use security::SecuritySettings;
pub use state::AppState;

use axum::routing::get;
use axum::Router;

/// The single `/chsk` route (spec §4.F): `GET` serves both the WebSocket
/// upgrade and the Ajax long-poll, `POST` serves the Ajax send path.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/chsk",
            get(http::chsk_get_handler).post(http::ajax_post_handler),
        )
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }

    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
