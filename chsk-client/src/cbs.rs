//! `cbs-waiting`: the client-side table of callbacks registered against an
//! outstanding cb-uuid (spec §4.G "Send"/"Receive").
//!
//! A callback is resolved at most once: by a reply, a timeout, or an error
//! path, mirroring the single-shot guard `chsk_core::reply::ReplyFn` uses
//! server-side (an internal compare-and-set, not a consuming `self`) —
//! here realized as "remove from the map wins" since each cb-uuid's
//! `oneshot::Sender` is consumed by whichever caller removes it first.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

/// What a registered callback eventually resolves to.
#[derive(Clone)]
pub enum CbReply {
    Value(Value),
    Closed,
    Timeout,
    Error(String),
}

/// Table of callbacks waiting on a reply, keyed by cb-uuid.
#[derive(Default)]
pub struct CbsWaiting {
    waiting: Mutex<HashMap<String, oneshot::Sender<CbReply>>>,
}

impl CbsWaiting {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh cb-uuid, returning the receiver half the caller
    /// awaits (directly, or via a timeout race).
    pub fn register(&self, cb_uuid: String) -> oneshot::Receiver<CbReply> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().unwrap().insert(cb_uuid, tx);
        rx
    }

    /// Resolve a still-waiting callback exactly once; a second or late call
    /// for the same cb-uuid (e.g. a timeout firing after a reply already
    /// removed the entry) is a silent no-op.
    pub fn resolve(&self, cb_uuid: &str, reply: CbReply) -> bool {
        let tx = self.waiting.lock().unwrap().remove(cb_uuid);
        match tx {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// True iff a cb-uuid is still registered (used by the timeout task to
    /// decide whether it's still responsible before firing).
    #[must_use]
    pub fn is_waiting(&self, cb_uuid: &str) -> bool {
        self.waiting.lock().unwrap().contains_key(cb_uuid)
    }

    /// Drain and resolve every still-waiting callback with `reply` (used on
    /// disconnect/downgrade: spec §7 "a write exception triggers
    /// reconnect... and invokes any pending cb with `:chsk/error`").
    pub fn resolve_all(&self, reply_for: impl Fn() -> CbReply) {
        let mut waiting = self.waiting.lock().unwrap();
        for (_, tx) in waiting.drain() {
            let _ = tx.send(reply_for());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_to_the_registered_receiver() {
        let cbs = CbsWaiting::new();
        let rx = cbs.register("abc123".to_owned());
        assert!(cbs.is_waiting("abc123"));
        assert!(cbs.resolve("abc123", CbReply::Value(serde_json::json!(42))));
        assert!(!cbs.is_waiting("abc123"));
        match rx.await.unwrap() {
            CbReply::Value(v) => assert_eq!(v, serde_json::json!(42)),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_resolve_for_same_cb_uuid_is_a_noop() {
        let cbs = CbsWaiting::new();
        let _rx = cbs.register("abc123".to_owned());
        assert!(cbs.resolve("abc123", CbReply::Timeout));
        assert!(!cbs.resolve("abc123", CbReply::Error("late".to_owned())));
    }

    #[tokio::test]
    async fn resolve_all_drains_every_waiting_callback() {
        let cbs = CbsWaiting::new();
        let rx1 = cbs.register("a".to_owned());
        let rx2 = cbs.register("b".to_owned());
        cbs.resolve_all(|| CbReply::Closed);
        assert!(matches!(rx1.await.unwrap(), CbReply::Closed));
        assert!(matches!(rx2.await.unwrap(), CbReply::Closed));
    }
}

impl std::fmt::Debug for CbReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CbReply::Value(v) => write!(f, "Value({v})"),
            CbReply::Closed => write!(f, "Closed"),
            CbReply::Timeout => write!(f, "Timeout"),
            CbReply::Error(e) => write!(f, "Error({e})"),
        }
    }
}
