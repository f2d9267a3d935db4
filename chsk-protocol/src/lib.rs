//! chsk-protocol: wire-level packing and event shape for the channel socket
//! subsystem (spec §3, §4.A, §4.B).
//!
//! This crate knows nothing about transports, registries, or HTTP — it is
//! the pure data layer shared by `chsk-core`, `chsk-server`, and
//! `chsk-client`.

pub mod control;
pub mod envelope;
pub mod event;
pub mod packer;

pub use envelope::{CbId, Envelope, EnvelopeError};
pub use event::{Event, EventError};
pub use packer::{read_wire, write_wire, JsonPacker, Packer, PackerError};
