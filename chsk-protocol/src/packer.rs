//! Packer contract and the legacy wire-prefix handling (spec §4.A, §6, §9).
//!
//! `Packer::pack`/`unpack` work on a bare JSON value; they never see event
//! semantics, only the [`Envelope`] the core wraps around it. [`read_wire`]
//! and [`write_wire`] are the core's entry points: they own the envelope
//! wrap/unwrap and the legacy `+`/`-` prefix handling spec.md asks
//! implementations to preserve, not guess at.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use serde_json::Value;
use tracing::warn;

use crate::envelope::Envelope;
use crate::event::Event;

/// Bidirectional serializer for packed payloads (spec §4.A).
///
/// The shipped implementation ([`JsonPacker`]) is what every wire format in
/// the teacher workspace uses; the trait exists so a consuming application
/// can plug in another `serde`-compatible codec without touching the core.
pub trait Packer: Send + Sync {
    fn pack(&self, value: &Value) -> String;
    fn unpack(&self, raw: &str) -> Result<Value, PackerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackerError(pub String);

impl std::fmt::Display for PackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unpack failed: {}", self.0)
    }
}

impl std::error::Error for PackerError {}

/// The default packer: plain JSON via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPacker;

impl Packer for JsonPacker {
    fn pack(&self, value: &Value) -> String {
        // `Value` serialization to a `String` buffer cannot fail.
        serde_json::to_string(value).expect("serde_json::Value serialization is infallible")
    }

    fn unpack(&self, raw: &str) -> Result<Value, PackerError> {
        serde_json::from_str(raw).map_err(|e| PackerError(e.to_string()))
    }
}

/// Legacy read prefixes (spec §4.A, §6, §9): `+` means envelope-wrapped,
/// `-` means a bare payload with no cb. Absence of a prefix means
/// envelope-wrapped in the current format. Writers never use `-`.
const LEGACY_WRAPPED_PREFIX: char = '+';
const LEGACY_BARE_PREFIX: char = '-';

static LEGACY_WRITE_PREFIX: OnceLock<AtomicBool> = OnceLock::new();

fn legacy_write_flag() -> &'static AtomicBool {
    LEGACY_WRITE_PREFIX.get_or_init(|| AtomicBool::new(false))
}

/// Force `+`-prefixed legacy writes for interop with older peers.
///
/// Process-wide by design (spec §4.A): this is a transitional knob, not a
/// per-call option.
pub fn set_legacy_write_prefix(enabled: bool) {
    legacy_write_flag().store(enabled, Ordering::Relaxed);
}

/// Whether writes currently emit the legacy `+` prefix.
#[must_use]
pub fn legacy_write_prefix() -> bool {
    legacy_write_flag().load(Ordering::Relaxed)
}

/// Pack an envelope onto the wire, honoring the legacy-write flag.
#[must_use]
pub fn write_wire(packer: &dyn Packer, envelope: &Envelope) -> String {
    let value = serde_json::to_value(envelope)
        .expect("Envelope serialization is infallible for well-formed values");
    let packed = packer.pack(&value);
    if legacy_write_prefix() {
        format!("{LEGACY_WRAPPED_PREFIX}{packed}")
    } else {
        packed
    }
}

/// Unpack a raw wire string into an [`Envelope`], tolerating the `+`/`-`
/// legacy read prefixes. Never fails: on unpack failure this yields
/// `[chsk/bad-package, raw]` with no cb-uuid, and logs (spec §4.A).
#[must_use]
pub fn read_wire(packer: &dyn Packer, raw: &str) -> Envelope {
    let (body, bare) = match raw.chars().next() {
        Some(LEGACY_WRAPPED_PREFIX) => (&raw[LEGACY_WRAPPED_PREFIX.len_utf8()..], false),
        Some(LEGACY_BARE_PREFIX) => (&raw[LEGACY_BARE_PREFIX.len_utf8()..], true),
        _ => (raw, false),
    };

    if bare {
        return match packer.unpack(body) {
            Ok(value) => Envelope::new(value),
            Err(err) => bad_package_envelope(raw, &err),
        };
    }

    match packer.unpack(body) {
        Ok(value) => match Envelope::try_from(value) {
            Ok(env) => env,
            Err(err) => {
                warn!(error = %err, "chsk: malformed envelope on read");
                Envelope::new(Event::bad_package(Value::String(raw.to_owned())).to_value())
            }
        },
        Err(err) => bad_package_envelope(raw, &err),
    }
}

fn bad_package_envelope(raw: &str, err: &PackerError) -> Envelope {
    warn!(error = %err, "chsk: failed to unpack wire payload");
    Envelope::new(Event::bad_package(Value::String(raw.to_owned())).to_value())
}
