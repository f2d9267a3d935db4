//! Reserved control event ids (spec §6) and callback-only reply sentinels.

/// Server -> client control events.
pub mod server_to_client {
    pub const HANDSHAKE: &str = "chsk/handshake";
    pub const WS_PING: &str = "chsk/ws-ping";
    pub const STATE: &str = "chsk/state";
    pub const RECV: &str = "chsk/recv";
    pub const CLOSE: &str = "chsk/close";
    pub const TIMEOUT: &str = "chsk/timeout";
    pub const BAD_PACKAGE: &str = "chsk/bad-package";
    pub const BAD_EVENT: &str = "chsk/bad-event";
}

/// Client -> server control events observed at the server app level.
pub mod client_to_server {
    pub const WS_PING: &str = "chsk/ws-ping";
    pub const UIDPORT_OPEN: &str = "chsk/uidport-open";
    pub const UIDPORT_CLOSE: &str = "chsk/uidport-close";
}

/// Callback-only reply values; never delivered as events.
pub mod cb_reply {
    pub const CLOSED: &str = "chsk/closed";
    pub const TIMEOUT: &str = "chsk/timeout";
    pub const ERROR: &str = "chsk/error";
    pub const DUMMY_CB_200: &str = "chsk/dummy-cb-200";
}

/// The application-chosen opaque user id has two reserved sentinels.
pub mod uid {
    /// "Authenticated-but-unidentified".
    pub const NIL_UID: &str = "chsk/nil-uid";
    /// Rewritten to [`NIL_UID`] by the send path.
    pub const ALL_USERS_WITHOUT_UID: &str = "chsk/all-users-without-uid";
}
