//! Internal error types that must surface to the Rust caller rather than
//! being rewritten to a wire-level sentinel (spec §7, "Protocol/validation"
//! vs. the rest of the taxonomy).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("cannot send to the nil uid")]
    NilUid,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("event handler failed: {0}")]
    HandlerFailed(String),
}
