//! Client-side error types that must surface to the Rust caller (spec §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    /// `send` was called while `open? == false` (spec §4.G "Send").
    #[error("chsk/closed")]
    Closed,
    /// The event failed send-path validation (spec §4.B).
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    /// The underlying transport write failed.
    #[error("transport write failed: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("websocket connect failed: {0}")]
    Ws(String),
    #[error("ajax handshake request failed: {0}")]
    Ajax(String),
}
