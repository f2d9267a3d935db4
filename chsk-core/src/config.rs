//! Server-side configuration knobs (spec §6), with the documented defaults.
//!
//! Mirrors the shape of the teacher's `UplinkConfig`
//! (`services/forwarder/src/uplink.rs`): a plain struct of `Duration`/
//! `usize` fields with a `Default` impl, no builder macro.

use std::collections::HashSet;
use std::time::Duration;

use crate::registry::Transport;

/// Which origins are accepted for the `Origin`/`Referer` check (spec §4.F).
#[derive(Debug, Clone)]
pub enum AllowedOrigins {
    All,
    Set(HashSet<String>),
}

impl Default for AllowedOrigins {
    fn default() -> Self {
        AllowedOrigins::All
    }
}

impl AllowedOrigins {
    #[must_use]
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            AllowedOrigins::All => true,
            AllowedOrigins::Set(set) => set.contains(origin),
        }
    }
}

/// Server-side configuration (spec §6).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Sliding receive-channel capacity before the oldest message is dropped.
    pub recv_buf_or_n: usize,
    /// WebSocket keep-alive: send `chsk/ws-ping` after this much inactivity.
    pub ws_kalive_ms: Duration,
    /// Long-poll timeout before the server sends `chsk/timeout`.
    pub lp_timeout_ms: Duration,
    pub send_buf_ms_ws: Duration,
    pub send_buf_ms_ajax: Duration,
    pub ms_allow_reconnect_before_close_ws: Duration,
    pub ms_allow_reconnect_before_close_ajax: Duration,
    pub allowed_origins: AllowedOrigins,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            recv_buf_or_n: 1000,
            ws_kalive_ms: Duration::from_millis(25_000),
            lp_timeout_ms: Duration::from_millis(20_000),
            send_buf_ms_ws: Duration::from_millis(30),
            send_buf_ms_ajax: Duration::from_millis(100),
            ms_allow_reconnect_before_close_ws: Duration::from_millis(2_500),
            ms_allow_reconnect_before_close_ajax: Duration::from_millis(5_000),
            allowed_origins: AllowedOrigins::All,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn send_buf_delay(&self, transport: Transport) -> Duration {
        match transport {
            Transport::Ws => self.send_buf_ms_ws,
            Transport::Ajax => self.send_buf_ms_ajax,
        }
    }

    #[must_use]
    pub fn grace_ms(&self, transport: Transport) -> Duration {
        match transport {
            Transport::Ws => self.ms_allow_reconnect_before_close_ws,
            Transport::Ajax => self.ms_allow_reconnect_before_close_ajax,
        }
    }
}
