//! `ChskHub`: wires the registry, buffer engine, and receive channel into
//! the one shared handle a server adapter (`chsk-server`) drives per
//! process, the way the teacher's `AppState` bundles its registries,
//! broadcast sender, and `UiLogger` into one struct handed to every route.

use std::sync::Arc;

use chsk_protocol::control::client_to_server;
use chsk_protocol::{Event, Packer};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::buffer::BufferEngine;
use crate::config::ServerConfig;
use crate::error::SendError;
use crate::event_msg::EventMsg;
use crate::registry::{Cid, Registry, Transport, Uid};

pub struct ChskHub {
    pub registry: Arc<Registry>,
    pub buffer: Arc<BufferEngine>,
    pub packer: Arc<dyn Packer>,
    pub config: ServerConfig,
    recv_tx: mpsc::Sender<EventMsg>,
}

impl ChskHub {
    /// Build a hub and the receive-channel consumer half, which the caller
    /// hands to [`crate::router::Router::spawn`].
    #[must_use]
    pub fn new(config: ServerConfig, packer: Arc<dyn Packer>) -> (Arc<Self>, mpsc::Receiver<EventMsg>) {
        let registry = Arc::new(Registry::new());
        let buffer = BufferEngine::new(registry.clone(), packer.clone(), config.clone());
        let (recv_tx, recv_rx) = mpsc::channel(config.recv_buf_or_n.max(1));
        (
            Arc::new(Self {
                registry,
                buffer,
                packer,
                config,
                recv_tx,
            }),
            recv_rx,
        )
    }

    /// `send(uid, event, flush?)` (spec §4.E), the application-facing
    /// entry point to the buffer engine.
    pub async fn send(&self, uid: &str, event: Value, flush_now: bool) -> Result<(), SendError> {
        self.buffer.send(uid, event, flush_now).await
    }

    /// Hand a message received off a connection to the router's receive
    /// channel. A full channel silently drops the oldest-style backpressure
    /// signal (`recv-buf-or-n` is a sliding bound in spec terms); here a
    /// bounded `mpsc` applies backpressure to the caller instead, which for
    /// a connection handler means briefly stalling reads, never panicking.
    pub async fn dispatch(&self, msg: EventMsg) {
        if self.recv_tx.send(msg).await.is_err() {
            tracing::warn!("chsk: receive channel closed, dropping message");
        }
    }

    /// Synthesize and enqueue a control event-msg for the application
    /// handler (`chsk/uidport-open` / `chsk/uidport-close`), never sent
    /// over the wire.
    pub async fn emit_control(&self, uid: &Uid, cid: &Cid, transport: Transport, control_id: &str) {
        let event = Event::new(control_id, Some(Value::String(uid.clone())));
        self.dispatch(EventMsg::new(uid.clone(), cid.clone(), transport, event, None))
            .await;
    }

    /// Schedule the grace-close detach for a connection that just closed
    /// (spec §4.D/§4.F `onClose`): after `ms-allow-reconnect-before-close-*`,
    /// detach iff the `(sch, udt)` snapshot is unchanged, and if that was
    /// the uid's last channel, enqueue `chsk/uidport-close`.
    pub fn schedule_grace_detach(self: &Arc<Self>, transport: Transport, uid: Uid, cid: Cid) {
        let hub = self.clone();
        tokio::spawn(async move {
            let Some(snapshot) = hub.registry.snapshot(transport, &uid, &cid).await else {
                return;
            };
            tokio::time::sleep(hub.config.grace_ms(transport)).await;
            let outcome = hub.registry.detach(transport, &uid, &cid, snapshot).await;
            if outcome.removed && outcome.uid_left_any {
                hub.emit_control(&uid, &cid, transport, client_to_server::UIDPORT_CLOSE)
                    .await;
            }
        });
    }
}
