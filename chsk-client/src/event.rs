//! `ClientEvent`: what the client pushes onto the application's receive
//! channel (spec §4.G "Receive", §3 "Client state").
//!
//! There is no server-side `Router Loop` analog on the client (spec §2
//! scopes component J to the server); the client simply hands a stream of
//! these to whatever the caller wires up, the same shape as
//! `chsk_core::EventMsg` flowing out of the hub's receive channel.

use serde_json::Value;

use chsk_protocol::Event;

use crate::state::{ClientState, StateTransition};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// First server->client frame on a (re)connection (spec §6 "Handshake
    /// frame"): `uid`, `handshake_data`, and whether this is this client's
    /// very first handshake ever (`first_handshake?`).
    Handshake {
        uid: String,
        handshake_data: Value,
        first_handshake: bool,
    },
    /// A `chsk/state` transition (spec §3, §4.G): published whenever
    /// `state_` changes, carrying old/new plus the derived transient flags.
    State {
        old: Box<ClientState>,
        new: Box<ClientState>,
        transition: StateTransition,
    },
    /// A validated application event delivered from the server's buffered
    /// batch (spec §4.G "Receive" (d)).
    Msg(Event),
}
