//! Event shape and validation (spec §3, §4.B).
//!
//! An event is an ordered pair `[event-id, data?]`. `event-id` must be a
//! namespaced symbolic identifier: a non-empty segment, a `/`, and a
//! non-empty name. Anything else is not a well-formed event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Namespace reserved for transport control events (`chsk/handshake`, ...).
pub const NS_CHSK: &str = "chsk";
/// Namespace reserved for internal sentinels; user code must not fabricate these.
pub const NS_SENTE: &str = "sente";

/// Emitted in place of a malformed event received off the wire.
pub const EVENT_ID_BAD_EVENT: &str = "chsk/bad-event";
/// Emitted in place of a payload the packer could not unpack.
pub const EVENT_ID_BAD_PACKAGE: &str = "chsk/bad-package";

/// An `[event-id, data?]` pair, validated on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: String,
    pub data: Option<Value>,
}

/// Why a candidate value is not a well-formed [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Not a length-1 or length-2 array.
    NotAPair,
    /// First element is not a string.
    IdNotString,
    /// First element has no non-empty namespace segment before `/`.
    IdNotNamespaced,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventError::NotAPair => write!(f, "event must be a 1- or 2-element array"),
            EventError::IdNotString => write!(f, "event id must be a string"),
            EventError::IdNotNamespaced => {
                write!(f, "event id must have a non-empty namespace segment")
            }
        }
    }
}

impl std::error::Error for EventError {}

/// True iff `id` has a non-empty namespace segment before a `/`.
#[must_use]
pub fn is_namespaced(id: &str) -> bool {
    match id.split_once('/') {
        Some((ns, name)) => !ns.is_empty() && !name.is_empty(),
        None => false,
    }
}

/// True iff `id` is in a reserved namespace (`chsk/*` or `sente/*`).
#[must_use]
pub fn is_reserved(id: &str) -> bool {
    id.split_once('/')
        .is_some_and(|(ns, _)| ns == NS_CHSK || ns == NS_SENTE)
}

impl Event {
    #[must_use]
    pub fn new(id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Build the receive-path fallback `[chsk/bad-event, original]`.
    #[must_use]
    pub fn bad_event(original: Value) -> Self {
        Self {
            id: EVENT_ID_BAD_EVENT.to_owned(),
            data: Some(original),
        }
    }

    /// Build the receive-path fallback `[chsk/bad-package, raw]`.
    #[must_use]
    pub fn bad_package(raw: Value) -> Self {
        Self {
            id: EVENT_ID_BAD_PACKAGE.to_owned(),
            data: Some(raw),
        }
    }

    /// Validate an arbitrary JSON value as an event per spec §4.B.
    ///
    /// Used on the send path, where a validation failure must be reported
    /// to the caller rather than silently rewritten.
    pub fn validate(value: &Value) -> Result<Event, EventError> {
        let arr = value.as_array().ok_or(EventError::NotAPair)?;
        if arr.is_empty() || arr.len() > 2 {
            return Err(EventError::NotAPair);
        }
        let id = arr[0].as_str().ok_or(EventError::IdNotString)?;
        if !is_namespaced(id) {
            return Err(EventError::IdNotNamespaced);
        }
        Ok(Event {
            id: id.to_owned(),
            data: arr.get(1).cloned(),
        })
    }

    /// Parse a received value, replacing malformed input with `chsk/bad-event`
    /// per the receive-path rule (spec §4.B), never failing.
    #[must_use]
    pub fn from_received(value: Value) -> Event {
        match Event::validate(&value) {
            Ok(ev) => ev,
            Err(_) => Event::bad_event(value),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match &self.data {
            Some(data) => Value::Array(vec![Value::String(self.id.clone()), data.clone()]),
            None => Value::Array(vec![Value::String(self.id.clone())]),
        }
    }
}

impl Serialize for Event {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Event::validate(&value).map_err(serde::de::Error::custom)
    }
}
