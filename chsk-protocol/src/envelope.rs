//! Wire envelope: `[value]` or `[value, cb-uuid]` (spec §3, §4.A, §6).
//!
//! The envelope is the only thing the [`crate::packer::Packer`] ever sees —
//! it has no knowledge of event semantics. A single reserved sentinel, the
//! JSON integer `0`, stands in for "Ajax callback" in the cb-uuid slot.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The callback slot of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CbId {
    /// Wire sentinel `0`: correlated by the originating Ajax request, no
    /// separate uuid needed.
    AjaxCb,
    /// A short opaque token minted by the caller expecting a reply.
    Uuid(String),
}

impl CbId {
    fn to_value(&self) -> Value {
        match self {
            CbId::AjaxCb => Value::from(0),
            CbId::Uuid(s) => Value::String(s.clone()),
        }
    }
}

/// A packed envelope: a payload value plus an optional callback id.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub value: Value,
    pub cb_id: Option<CbId>,
}

impl Envelope {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self { value, cb_id: None }
    }

    #[must_use]
    pub fn with_cb(value: Value, cb_id: CbId) -> Self {
        Self {
            value,
            cb_id: Some(cb_id),
        }
    }
}

/// Error unpacking a raw envelope array into [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    NotAnArray,
    WrongArity,
    BadCbSlot,
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::NotAnArray => write!(f, "envelope must be a JSON array"),
            EnvelopeError::WrongArity => write!(f, "envelope must have 1 or 2 elements"),
            EnvelopeError::BadCbSlot => write!(f, "cb-uuid slot must be the integer 0 or a string"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl Serialize for Envelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.cb_id {
            Some(cb) => (&self.value, cb.to_value()).serialize(serializer),
            None => [&self.value].serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Envelope::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<Value> for Envelope {
    type Error = EnvelopeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let mut arr = match value {
            Value::Array(arr) => arr,
            _ => return Err(EnvelopeError::NotAnArray),
        };
        match arr.len() {
            1 => Ok(Envelope::new(arr.pop().expect("len checked"))),
            2 => {
                let cb_raw = arr.pop().expect("len checked");
                let payload = arr.pop().expect("len checked");
                let cb_id = match &cb_raw {
                    Value::Number(n) if n.as_i64() == Some(0) => CbId::AjaxCb,
                    Value::String(s) => CbId::Uuid(s.clone()),
                    _ => return Err(EnvelopeError::BadCbSlot),
                };
                Ok(Envelope::with_cb(payload, cb_id))
            }
            _ => Err(EnvelopeError::WrongArity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_value_only_envelope_as_singleton_array() {
        let env = Envelope::new(json!(["my/echo", 1]));
        assert_eq!(serde_json::to_value(&env).unwrap(), json!([["my/echo", 1]]));
    }

    #[test]
    fn serializes_uuid_cb_as_pair() {
        let env = Envelope::with_cb(json!(42), CbId::Uuid("ab12cd".to_owned()));
        assert_eq!(serde_json::to_value(&env).unwrap(), json!([42, "ab12cd"]));
    }

    #[test]
    fn serializes_ajax_cb_sentinel_as_integer_zero() {
        let env = Envelope::with_cb(json!(42), CbId::AjaxCb);
        assert_eq!(serde_json::to_value(&env).unwrap(), json!([42, 0]));
    }

    #[test]
    fn round_trips_through_value() {
        for env in [
            Envelope::new(json!({"a": 1})),
            Envelope::with_cb(json!([1, 2]), CbId::Uuid("tok01".to_owned())),
            Envelope::with_cb(json!("done"), CbId::AjaxCb),
        ] {
            let value = serde_json::to_value(&env).unwrap();
            let back = Envelope::try_from(value).unwrap();
            assert_eq!(back, env);
        }
    }

    #[test]
    fn rejects_non_array_wrong_arity_and_bad_cb_slot() {
        assert_eq!(
            Envelope::try_from(json!("nope")).unwrap_err(),
            EnvelopeError::NotAnArray
        );
        assert_eq!(
            Envelope::try_from(json!([])).unwrap_err(),
            EnvelopeError::WrongArity
        );
        assert_eq!(
            Envelope::try_from(json!([1, 2, 3])).unwrap_err(),
            EnvelopeError::WrongArity
        );
        assert_eq!(
            Envelope::try_from(json!([1, true])).unwrap_err(),
            EnvelopeError::BadCbSlot
        );
    }
}
