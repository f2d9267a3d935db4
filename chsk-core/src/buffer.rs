//! Server send/buffer/fanout engine (spec §4.E).
//!
//! Coalesces events addressed to a `uid` over a short window, then hands
//! the packed batch to `fanout`, which retries against not-yet-reconnected
//! clients using the fixed backoff sequence `90, 180, 360, 720, 1440` ms
//! (each randomized in `[b, 2b)`) before giving up. Scheduled work is
//! spawned as independent `tokio::spawn` tasks carrying the identity token
//! (the minted `ev-uuid`) they must re-check on wake — the same shape as
//! the teacher's heartbeat `tokio::time::interval` /
//! `tokio::time::timeout` use in `ws_forwarder.rs`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chsk_protocol::control::uid as uid_sentinels;
use chsk_protocol::{write_wire, Packer};
use rand::Rng;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::adapter::ServerChannel;
use crate::config::ServerConfig;
use crate::error::SendError;
use crate::registry::{Cid, Expected, PerTransport, Registry, Transport, Uid};

/// Backoff schedule for fanout retries (spec §4.E), randomized per-step
/// into `[b, 2b)`.
const FANOUT_BACKOFF_MS: [u64; 5] = [90, 180, 360, 720, 1440];

#[derive(Debug, Default)]
struct PendingBatch {
    events: Vec<Value>,
    ev_uuids: HashSet<String>,
}

/// The server send/buffer/fanout engine for one channel socket hub.
pub struct BufferEngine {
    registry: Arc<Registry>,
    packer: Arc<dyn Packer>,
    config: ServerConfig,
    pending: PerTransport<RwLock<HashMap<Uid, PendingBatch>>>,
}

fn rewrite_uid_alias(uid: &str) -> String {
    if uid == uid_sentinels::ALL_USERS_WITHOUT_UID {
        uid_sentinels::NIL_UID.to_owned()
    } else {
        uid.to_owned()
    }
}

fn is_close_sentinel(event: &Value) -> bool {
    event
        .as_array()
        .is_some_and(|arr| arr.len() == 1 && arr[0].as_str() == Some(chsk_protocol::control::server_to_client::CLOSE))
}

impl BufferEngine {
    #[must_use]
    pub fn new(registry: Arc<Registry>, packer: Arc<dyn Packer>, config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            packer,
            config,
            pending: PerTransport::default(),
        })
    }

    /// `send(uid, event, flush?)` (spec §4.E).
    pub async fn send(self: &Arc<Self>, uid: &str, event: Value, flush_now: bool) -> Result<(), SendError> {
        let uid = rewrite_uid_alias(uid);
        if uid == uid_sentinels::NIL_UID {
            return Err(SendError::NilUid);
        }

        if is_close_sentinel(&event) {
            self.close_all(&uid).await;
            return Ok(());
        }

        let ev_uuid = Uuid::new_v4().to_string();
        for transport in [Transport::Ws, Transport::Ajax] {
            let mut pending = self.pending.get(transport).write().await;
            let batch = pending.entry(uid.clone()).or_default();
            batch.events.push(event.clone());
            batch.ev_uuids.insert(ev_uuid.clone());
        }

        if flush_now {
            self.flush(Transport::Ws, &uid, None).await;
            self.flush(Transport::Ajax, &uid, None).await;
        } else {
            self.schedule_flush(Transport::Ws, uid.clone(), ev_uuid.clone());
            self.schedule_flush(Transport::Ajax, uid, ev_uuid);
        }
        Ok(())
    }

    fn schedule_flush(self: &Arc<Self>, transport: Transport, uid: Uid, ev_uuid: String) {
        let engine = self.clone();
        let delay = self.config.send_buf_delay(transport);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.flush(transport, &uid, Some(&ev_uuid)).await;
        });
    }

    /// `flush(transport)`: atomically read-and-clear the batch for `uid`,
    /// but only if `responsible` (the `ev-uuid` the scheduling call owns)
    /// is still present — otherwise a later `send` already flushed it and
    /// this wake becomes a no-op.
    async fn flush(&self, transport: Transport, uid: &str, responsible: Option<&str>) {
        let packed = {
            let mut pending = self.pending.get(transport).write().await;
            let Some(batch) = pending.get(uid) else {
                return;
            };
            if let Some(ev_uuid) = responsible {
                if !batch.ev_uuids.contains(ev_uuid) {
                    return;
                }
            }
            let batch = pending.remove(uid).expect("checked present above");
            if batch.events.is_empty() {
                return;
            }
            let value = Value::Array(batch.events);
            write_wire(self.packer.as_ref(), &chsk_protocol::Envelope::new(value))
        };
        self.fanout(transport, uid, packed).await;
    }

    /// `fanout(transport, uid, packedBatch, batchSize)` (spec §4.E).
    async fn fanout(&self, transport: Transport, uid: &str, packed: String) {
        let mut unsatisfied: Vec<Cid> = self
            .registry
            .channels_for(transport, uid)
            .await
            .into_iter()
            .map(|(cid, _)| cid)
            .collect();
        if unsatisfied.is_empty() {
            return;
        }

        unsatisfied = self.attempt_fanout(transport, uid, &packed, unsatisfied).await;

        for base in FANOUT_BACKOFF_MS {
            if unsatisfied.is_empty() {
                break;
            }
            let jitter_ms = { rand::thread_rng().gen_range(base..base * 2) };
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            unsatisfied = self.attempt_fanout(transport, uid, &packed, unsatisfied).await;
        }

        if !unsatisfied.is_empty() {
            debug!(
                uid,
                ?transport,
                count = unsatisfied.len(),
                "chsk: fanout exhausted retries, events dropped (best-effort delivery)"
            );
        }
    }

    async fn attempt_fanout(
        &self,
        transport: Transport,
        uid: &str,
        packed: &str,
        cids: Vec<Cid>,
    ) -> Vec<Cid> {
        let mut still_unsatisfied = Vec::new();
        for cid in cids {
            let sch = self
                .registry
                .snapshot(transport, uid, &cid)
                .await
                .and_then(|entry| entry.sch);
            let Some(sch) = sch else {
                still_unsatisfied.push(cid);
                continue;
            };
            if sch.send(packed.to_owned()).await {
                if matches!(transport, Transport::Ajax) {
                    // the long-poll HTTP response is now closed; a repoll reattaches.
                    self.registry
                        .attach(transport, uid, &cid, Expected::Exact(Some(sch)), None)
                        .await;
                }
            } else {
                still_unsatisfied.push(cid);
            }
        }
        still_unsatisfied
    }

    /// `[chsk/close]`: undocumented, internal-admin-only control send that
    /// closes every live channel for `uid` across both transports.
    async fn close_all(&self, uid: &str) {
        for transport in [Transport::Ws, Transport::Ajax] {
            let channels = self.registry.channels_for(transport, uid).await;
            for (_, sch) in channels {
                if let Some(sch) = sch {
                    sch.close().await;
                }
            }
        }
    }
}
