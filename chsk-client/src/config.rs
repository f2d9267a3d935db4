//! Client-side configuration knobs (spec §6), with the documented defaults.
//!
//! Mirrors the shape of `chsk_core::ServerConfig` and, before that, the
//! teacher's `UplinkConfig` (`services/forwarder/src/uplink.rs`): a plain
//! struct of fields with a `Default` impl, no builder macro.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Which transport a client starts on (spec §4.I `auto`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Auto,
    Ws,
    Ajax,
}

/// `backoff-ms-fn`: given the zero-based retry count, return how long to
/// wait before the next reconnect attempt. The default is exponential with
/// jitter, the same `rand` crate the teacher already depends on for token
/// generation (`services/server/src/http/admin.rs`).
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Exponential backoff with full jitter, capped at 30s: `rand(0, min(30s,
/// base * 2^retry))`. This is the `backoff-ms-fn` default (spec §6).
#[must_use]
pub fn default_backoff_ms_fn() -> BackoffFn {
    Arc::new(|retry: u32| {
        let base_ms = 500u64;
        let cap_ms = 30_000u64;
        let upper = base_ms.saturating_mul(1u64 << retry.min(16)).min(cap_ms);
        let jittered = rand::Rng::gen_range(&mut rand::thread_rng(), 0..=upper.max(1));
        Duration::from_millis(jittered)
    })
}

/// Client-side configuration (spec §6).
#[derive(Clone)]
pub struct ClientConfig {
    pub client_type: ClientType,
    /// e.g. `"ws"`/`"wss"` derived automatically from `protocol` for the WS
    /// transport; `protocol` itself is the Ajax scheme (`"http"`/`"https"`).
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    /// Extra query params merged into every connect/poll/send URL.
    pub params: HashMap<String, String>,
    /// Extra headers attached to every Ajax request.
    pub headers: HashMap<String, String>,
    pub client_id: String,
    pub csrf_token: Option<String>,
    /// Sliding receive-channel capacity before the oldest message is dropped.
    pub recv_buf_or_n: usize,
    pub backoff_ms_fn: BackoffFn,
    pub ws_kalive_ms: Duration,
    pub ws_kalive_ping_timeout_ms: Duration,
    /// Per-send default timeout when the caller doesn't specify one.
    pub default_send_timeout_ms: Duration,
    /// HTTP-level timeout for one long-poll GET; must exceed the server's
    /// `lp-timeout-ms` (default 20s) so the server's own `chsk/timeout`
    /// sentinel is what usually ends a poll, not the HTTP client (spec §6:
    /// "`lp-timeout-ms` ... must be `<` client default 60000").
    pub ajax_poll_timeout_ms: Duration,
}

impl ClientConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, path: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client_type: ClientType::Auto,
            protocol: "http".to_owned(),
            host: host.into(),
            port: None,
            path: path.into(),
            params: HashMap::new(),
            headers: HashMap::new(),
            client_id: client_id.into(),
            csrf_token: None,
            recv_buf_or_n: 2048,
            backoff_ms_fn: default_backoff_ms_fn(),
            ws_kalive_ms: Duration::from_millis(20_000),
            ws_kalive_ping_timeout_ms: Duration::from_millis(5_000),
            default_send_timeout_ms: Duration::from_millis(10_000),
            ajax_poll_timeout_ms: Duration::from_millis(60_000),
        }
    }

    fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }

    /// Build the WebSocket connect URL: `{ws|wss}://host/path?client-id=...&csrf-token=...&...`.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let scheme = if self.protocol == "https" { "wss" } else { "ws" };
        self.build_url(scheme, &[])
    }

    /// Build the Ajax URL (GET long-poll/handshake or POST send share this base).
    #[must_use]
    pub fn ajax_url(&self, extra: &[(&str, String)]) -> String {
        self.build_url(&self.protocol.clone(), extra)
    }

    fn build_url(&self, scheme: &str, extra: &[(&str, String)]) -> String {
        let mut url = url::Url::parse(&format!("{scheme}://{}{}", self.authority(), self.path))
            .expect("chsk client config produces a well-formed base URL");
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("client-id", &self.client_id);
            if let Some(csrf) = &self.csrf_token {
                qp.append_pair("csrf-token", csrf);
            }
            for (k, v) in &self.params {
                qp.append_pair(k, v);
            }
            for (k, v) in extra {
                qp.append_pair(k, v);
            }
        }
        url.into()
    }
}
