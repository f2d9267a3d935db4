//! Shared application state handed to every route, the same shape as the
//! teacher's `AppState` (`state.rs`): one cheaply-`Clone`-able struct of
//! `Arc`s passed via axum's `State` extractor.

use std::sync::Arc;

use axum::http::request::Parts;
use serde_json::Value;

use chsk_core::ChskHub;

use crate::security::SecuritySettings;

pub type UserIdFn = Arc<dyn Fn(&Parts, &std::collections::HashMap<String, String>) -> String + Send + Sync>;
pub type HandshakeDataFn = Arc<dyn Fn(&str) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ChskHub>,
    pub security: Arc<SecuritySettings>,
    /// Maps an inbound request to an application `uid`. Defaults to using
    /// the connection's `client-id` as the uid, matching the common
    /// anonymous-session default (see DESIGN.md for the Open Question this
    /// resolves).
    pub user_id_fn: UserIdFn,
    /// Extra payload embedded in the `chsk/handshake` frame's third slot.
    pub handshake_data_fn: HandshakeDataFn,
}

impl AppState {
    #[must_use]
    pub fn new(hub: Arc<ChskHub>, security: SecuritySettings) -> Self {
        Self {
            hub,
            security: Arc::new(security),
            user_id_fn: Arc::new(|_parts, params| {
                params.get("client-id").cloned().unwrap_or_default()
            }),
            handshake_data_fn: Arc::new(|_uid| Value::Null),
        }
    }

    #[must_use]
    pub fn with_user_id_fn(mut self, f: UserIdFn) -> Self {
        self.user_id_fn = f;
        self
    }

    #[must_use]
    pub fn with_handshake_data_fn(mut self, f: HandshakeDataFn) -> Self {
        self.handshake_data_fn = f;
        self
    }
}
