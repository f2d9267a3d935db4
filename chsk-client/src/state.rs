//! Published client connection state (spec §3 "Client state (`state_`)").
//!
//! The only field whose transitions are protocol-relevant is `open`; the
//! transient `opened?`/`closed?`/`first-open?` flags are derived once per
//! transition at the point a new [`ClientState`] is published, not stored.

use serde_json::Value;

use crate::config::ClientType;

/// Why a connection most recently closed (spec §4.G "Close reasons").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Clean,
    Unexpected,
    RequestedDisconnect,
    RequestedReconnect,
    DowngradingWsToAjax,
    WsPingTimeout,
    WsError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastClose {
    pub udt: u64,
    pub reason: CloseReason,
}

/// `state_`: the published, observable connection record (spec §3).
#[derive(Debug, Clone)]
pub struct ClientState {
    pub client_type: ClientType,
    pub open: bool,
    pub ever_opened: bool,
    pub uid: Option<String>,
    pub handshake_data: Value,
    pub csrf_token: Option<String>,
    pub last_ws_error: Option<String>,
    pub last_ws_close: Option<String>,
    pub last_close: Option<LastClose>,
    pub udt_next_reconnect: Option<u64>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            client_type: ClientType::Auto,
            open: false,
            ever_opened: false,
            uid: None,
            handshake_data: Value::Null,
            csrf_token: None,
            last_ws_error: None,
            last_ws_close: None,
            last_close: None,
            udt_next_reconnect: None,
        }
    }
}

impl ClientState {
    #[must_use]
    pub fn new(client_type: ClientType) -> Self {
        Self {
            client_type,
            ..Self::default()
        }
    }
}

/// The transient flags computed once per state transition and delivered
/// alongside the new state as a `chsk/state` event (spec §3, §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub opened: bool,
    pub closed: bool,
    pub first_open: bool,
}

impl StateTransition {
    #[must_use]
    pub fn between(old: &ClientState, new: &ClientState) -> Self {
        let opened = !old.open && new.open;
        let closed = old.open && !new.open;
        let first_open = opened && !old.ever_opened;
        Self {
            opened,
            closed,
            first_open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_detects_first_open_only_once() {
        let closed = ClientState::new(ClientType::Ws);
        let mut opened = closed.clone();
        opened.open = true;
        opened.ever_opened = true;

        let first = StateTransition::between(&closed, &opened);
        assert!(first.opened);
        assert!(first.first_open);

        let mut reclosed = opened.clone();
        reclosed.open = false;
        let close_transition = StateTransition::between(&opened, &reclosed);
        assert!(close_transition.closed);
        assert!(!close_transition.first_open);

        let mut reopened = reclosed.clone();
        reopened.open = true;
        let second = StateTransition::between(&reclosed, &reopened);
        assert!(second.opened);
        assert!(!second.first_open, "ever_opened already true, not a first open");
    }
}
