//! Shared wire-frame builders for the reserved control events (spec §6),
//! used by both the WebSocket and Ajax entry points.

use chsk_protocol::control::{cb_reply, server_to_client};
use chsk_protocol::{write_wire, Envelope, Event, Packer};
use serde_json::{json, Value};

/// `[chsk/handshake, [uid, nil, handshake-data]]` (spec §6).
#[must_use]
pub fn handshake_wire(packer: &dyn Packer, uid: &str, handshake_data: Value) -> String {
    let event = Event::new(
        server_to_client::HANDSHAKE,
        Some(json!([uid, Value::Null, handshake_data])),
    );
    write_wire(packer, &Envelope::new(event.to_value()))
}

#[must_use]
pub fn ws_ping_wire(packer: &dyn Packer) -> String {
    write_wire(packer, &Envelope::new(Event::new(server_to_client::WS_PING, None).to_value()))
}

#[must_use]
pub fn timeout_wire(packer: &dyn Packer) -> String {
    write_wire(packer, &Envelope::new(Event::new(server_to_client::TIMEOUT, None).to_value()))
}

#[must_use]
pub fn closed_wire(packer: &dyn Packer) -> String {
    write_wire(packer, &Envelope::new(Value::String(cb_reply::CLOSED.to_owned())))
}

#[must_use]
pub fn dummy_cb_200_wire(packer: &dyn Packer) -> String {
    write_wire(packer, &Envelope::new(Value::String(cb_reply::DUMMY_CB_200.to_owned())))
}
