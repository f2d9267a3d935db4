//! Server connection registry (spec §4.D).
//!
//! `conns[transport][uid][cid] = (sch?, udt)` plus a derived `connected`
//! view, all mutated through whole-substructure compare-and-swap so that
//! concurrent `touch`/`attach`/`detach` calls on the same key linearize.
//! This mirrors the teacher's `AppState` registries
//! (`Arc<RwLock<HashMap<...>>>`, read-then-upgrade-to-write double-check in
//! `get_or_create_broadcast`) rather than a lock-per-entry design.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::adapter::{sch_eq, ServerChannel};

pub type Uid = String;
pub type Cid = String;

/// Which wire transport a connection entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Ws,
    Ajax,
}

/// Two transports, stored as plain fields rather than a `HashMap` keyed by
/// [`Transport`] — there are exactly two and the fields are cheaper to
/// reach than a hashed lookup.
#[derive(Debug, Default, Clone)]
pub struct PerTransport<T> {
    pub ws: T,
    pub ajax: T,
}

impl<T> PerTransport<T> {
    pub fn get(&self, t: Transport) -> &T {
        match t {
            Transport::Ws => &self.ws,
            Transport::Ajax => &self.ajax,
        }
    }

    pub fn get_mut(&mut self, t: Transport) -> &mut T {
        match t {
            Transport::Ws => &mut self.ws,
            Transport::Ajax => &mut self.ajax,
        }
    }
}

/// One server connection's current channel and last-activity timestamp.
#[derive(Debug, Clone, Default)]
pub struct ConnEntry {
    pub sch: Option<Arc<ServerChannel>>,
    /// Milliseconds since `UNIX_EPOCH`; the CAS/activity token (spec §3).
    pub udt: u64,
}

impl ConnEntry {
    fn matches(&self, other: &ConnEntry) -> bool {
        sch_eq(&self.sch, &other.sch) && self.udt == other.udt
    }
}

/// What an `attach`/detach caller expects the current value to be before
/// its write is allowed to apply.
#[derive(Debug, Clone)]
pub enum Expected<T> {
    /// Apply unconditionally (spec.md's `any`).
    Any,
    Exact(T),
}

#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as u64
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectedUsers {
    pub ws: HashSet<Uid>,
    pub ajax: HashSet<Uid>,
    pub any: HashSet<Uid>,
}

impl ConnectedUsers {
    fn recompute(
        &mut self,
        conns: &PerTransport<HashMap<Uid, HashMap<Cid, ConnEntry>>>,
    ) {
        // A uid counts as connected while it has *any* registry entry, live
        // sch or not: a nil sch means either a momentary Ajax post-send gap
        // awaiting repoll, or a connection inside its grace window awaiting
        // reconnect — in both cases the uid is still considered present
        // until `detach` actually removes the entry (spec §4.D/§4.F; see
        // DESIGN.md for why this reads entry-presence rather than
        // live-sch-only).
        self.ws = conns.ws.keys().cloned().collect();
        self.ajax = conns.ajax.keys().cloned().collect();
        self.any = self.ws.union(&self.ajax).cloned().collect();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOutcome {
    /// Whether the CAS condition held and the write applied.
    pub applied: bool,
    /// Whether this was the first-ever entry for `(transport, uid, cid)`.
    pub init: bool,
    /// Whether `uid` was previously absent from `connected.any` and now
    /// isn't (only meaningful when `applied`).
    pub uid_entered_any: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachOutcome {
    pub removed: bool,
    /// Whether `uid` transitioned out of `connected.any` as a result.
    pub uid_left_any: bool,
}

/// The server connection registry (spec §4.D).
#[derive(Default)]
pub struct Registry {
    conns: RwLock<PerTransport<HashMap<Uid, HashMap<Cid, ConnEntry>>>>,
    connected: RwLock<ConnectedUsers>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current read-only snapshot of connected-user sets.
    pub async fn connected(&self) -> ConnectedUsers {
        self.connected.read().await.clone()
    }

    /// `touch(transport, uid, cid)`: bump `udt`, leave `sch` untouched. A
    /// no-op if the entry doesn't exist (nothing to touch).
    pub async fn touch(&self, transport: Transport, uid: &str, cid: &str) {
        let mut conns = self.conns.write().await;
        if let Some(entry) = conns
            .get_mut(transport)
            .get_mut(uid)
            .and_then(|by_cid| by_cid.get_mut(cid))
        {
            entry.udt = now_millis();
        }
    }

    /// `attach(transport, uid, cid, expectedOldSch, newSch)` (spec §4.D).
    pub async fn attach(
        &self,
        transport: Transport,
        uid: &str,
        cid: &str,
        expected_old_sch: Expected<Option<Arc<ServerChannel>>>,
        new_sch: Option<Arc<ServerChannel>>,
    ) -> AttachOutcome {
        let mut conns = self.conns.write().await;
        let by_uid = conns.get_mut(transport);
        let init = !by_uid
            .get(uid)
            .is_some_and(|by_cid| by_cid.contains_key(cid));

        let current_sch = by_uid
            .get(uid)
            .and_then(|by_cid| by_cid.get(cid))
            .and_then(|entry| entry.sch.clone());

        let cas_ok = match &expected_old_sch {
            Expected::Any => true,
            Expected::Exact(expected) => sch_eq(&current_sch, expected),
        };
        if !cas_ok {
            return AttachOutcome {
                applied: false,
                init,
                uid_entered_any: false,
            };
        }

        let was_in_any = {
            let connected = self.connected.read().await;
            connected.any.contains(uid)
        };

        by_uid.entry(uid.to_owned()).or_default().insert(
            cid.to_owned(),
            ConnEntry {
                sch: new_sch,
                udt: now_millis(),
            },
        );

        let mut connected = self.connected.write().await;
        connected.recompute(&conns);
        let uid_entered_any = !was_in_any && connected.any.contains(uid);

        AttachOutcome {
            applied: true,
            init,
            uid_entered_any,
        }
    }

    /// `detach(transport, uid, cid, expectedSch)` (spec §4.D): CAS against
    /// a full entry snapshot taken at the time the grace timer was
    /// scheduled, so a reconnect in the interim aborts the removal.
    pub async fn detach(
        &self,
        transport: Transport,
        uid: &str,
        cid: &str,
        expected: ConnEntry,
    ) -> DetachOutcome {
        let mut conns = self.conns.write().await;
        let by_uid = conns.get_mut(transport);

        let still_matches = by_uid
            .get(uid)
            .and_then(|by_cid| by_cid.get(cid))
            .is_some_and(|entry| entry.matches(&expected));

        if !still_matches {
            return DetachOutcome {
                removed: false,
                uid_left_any: false,
            };
        }

        let was_in_any = {
            let connected = self.connected.read().await;
            connected.any.contains(uid)
        };

        if let Some(by_cid) = by_uid.get_mut(uid) {
            by_cid.remove(cid);
            if by_cid.is_empty() {
                by_uid.remove(uid);
            }
        }

        let mut connected = self.connected.write().await;
        connected.recompute(&conns);
        let uid_left_any = was_in_any && !connected.any.contains(uid);

        DetachOutcome {
            removed: true,
            uid_left_any,
        }
    }

    /// Snapshot of `(cid, sch)` currently registered under `(transport,
    /// uid)`, used by the fanout engine (spec §4.E).
    pub async fn channels_for(&self, transport: Transport, uid: &str) -> Vec<(Cid, Option<Arc<ServerChannel>>)> {
        let conns = self.conns.read().await;
        conns
            .get(transport)
            .get(uid)
            .map(|by_cid| {
                by_cid
                    .iter()
                    .map(|(cid, entry)| (cid.clone(), entry.sch.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current `(sch, udt)` snapshot for a connection, used to schedule a
    /// grace-close `detach` with the right CAS expectation.
    pub async fn snapshot(&self, transport: Transport, uid: &str, cid: &str) -> Option<ConnEntry> {
        let conns = self.conns.read().await;
        conns.get(transport).get(uid).and_then(|by_cid| by_cid.get(cid)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_channel() -> Arc<ServerChannel> {
        ServerChannel::new(|_| async { true }, || async {})
    }

    #[tokio::test]
    async fn attach_with_any_expectation_always_applies_and_flags_init() {
        let reg = Registry::new();
        let sch = dummy_channel();
        let outcome = reg
            .attach(Transport::Ws, "u1", "c1", Expected::Any, Some(sch))
            .await;
        assert!(outcome.applied);
        assert!(outcome.init);
        assert!(outcome.uid_entered_any);
        assert!(reg.connected().await.any.contains("u1"));
        assert!(reg.connected().await.ws.contains("u1"));
    }

    #[tokio::test]
    async fn attach_exact_rejects_stale_expectation() {
        let reg = Registry::new();
        let sch1 = dummy_channel();
        reg.attach(Transport::Ws, "u1", "c1", Expected::Any, Some(sch1.clone()))
            .await;

        let sch2 = dummy_channel();
        let outcome = reg
            .attach(
                Transport::Ws,
                "u1",
                "c1",
                Expected::Exact(None),
                Some(sch2),
            )
            .await;
        assert!(!outcome.applied);

        let outcome2 = reg
            .attach(
                Transport::Ws,
                "u1",
                "c1",
                Expected::Exact(Some(sch1)),
                None,
            )
            .await;
        assert!(outcome2.applied);
        assert!(!outcome2.init);
    }

    #[tokio::test]
    async fn detach_removes_entry_only_on_matching_snapshot_and_reports_any_transition() {
        let reg = Registry::new();
        let sch = dummy_channel();
        reg.attach(Transport::Ws, "u1", "c1", Expected::Any, Some(sch))
            .await;
        let snap = reg.snapshot(Transport::Ws, "u1", "c1").await.unwrap();

        // A touch in between invalidates the snapshot (udt changes).
        reg.touch(Transport::Ws, "u1", "c1").await;
        let stale = reg.detach(Transport::Ws, "u1", "c1", snap.clone()).await;
        assert!(!stale.removed);
        assert!(reg.connected().await.any.contains("u1"));

        let fresh = reg.snapshot(Transport::Ws, "u1", "c1").await.unwrap();
        let outcome = reg.detach(Transport::Ws, "u1", "c1", fresh).await;
        assert!(outcome.removed);
        assert!(outcome.uid_left_any);
        assert!(!reg.connected().await.any.contains("u1"));
    }

    #[tokio::test]
    async fn touch_preserves_channel_and_bumps_udt() {
        let reg = Registry::new();
        let sch = dummy_channel();
        reg.attach(Transport::Ws, "u1", "c1", Expected::Any, Some(sch))
            .await;
        let before = reg.snapshot(Transport::Ws, "u1", "c1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        reg.touch(Transport::Ws, "u1", "c1").await;
        let after = reg.snapshot(Transport::Ws, "u1", "c1").await.unwrap();
        assert!(sch_eq(&before.sch, &after.sch));
        assert!(after.udt >= before.udt);
    }

    #[tokio::test]
    async fn connected_any_reflects_either_transport() {
        let reg = Registry::new();
        reg.attach(Transport::Ajax, "u1", "c1", Expected::Any, None)
            .await;
        assert!(reg.connected().await.any.contains("u1"));
        assert!(!reg.connected().await.ws.contains("u1"));
    }

    #[tokio::test]
    async fn a_nil_sch_entry_still_counts_as_connected_during_its_gap() {
        // Mirrors the post-send Ajax state: the entry exists (a repoll will
        // reattach it) even though there is no live channel right now.
        let reg = Registry::new();
        reg.attach(Transport::Ajax, "u1", "c1", Expected::Any, Some(dummy_channel()))
            .await;
        reg.attach(Transport::Ajax, "u1", "c1", Expected::Any, None)
            .await;
        assert!(reg.connected().await.any.contains("u1"));
    }

    #[tokio::test]
    async fn channels_for_returns_all_cids_for_uid() {
        let reg = Registry::new();
        reg.attach(Transport::Ws, "u1", "c1", Expected::Any, Some(dummy_channel()))
            .await;
        reg.attach(Transport::Ws, "u1", "c2", Expected::Any, None)
            .await;
        let mut cids: Vec<_> = reg
            .channels_for(Transport::Ws, "u1")
            .await
            .into_iter()
            .map(|(cid, _)| cid)
            .collect();
        cids.sort();
        assert_eq!(cids, vec!["c1".to_owned(), "c2".to_owned()]);
    }
}
