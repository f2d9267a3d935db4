//! State shared across whichever transport currently backs a client
//! (spec §4.I): the published `state_`, the receive channel, and the
//! callback-waiting table all outlive any one WebSocket/Ajax delegate, so
//! the auto wrapper can swap delegates without watchers noticing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chsk_protocol::Packer;
use tokio::sync::{mpsc, watch, RwLock};

use crate::cbs::CbsWaiting;
use crate::config::ClientConfig;
use crate::event::ClientEvent;
use crate::state::{ClientState, StateTransition};

pub struct Shared {
    pub config: ClientConfig,
    pub packer: Arc<dyn Packer>,
    pub cbs: CbsWaiting,
    state: RwLock<ClientState>,
    state_tx: watch::Sender<ClientState>,
    events_tx: mpsc::Sender<ClientEvent>,
    /// Process-wide-in-spirit teardown flag (spec §9 "Global state"):
    /// scoped per client instance here rather than truly process-global,
    /// since a Rust process may host more than one client (see DESIGN.md).
    unloading: AtomicBool,
}

impl Shared {
    #[must_use]
    pub fn new(config: ClientConfig, packer: Arc<dyn Packer>) -> (Arc<Self>, mpsc::Receiver<ClientEvent>) {
        let initial = ClientState::new(config.client_type);
        let (state_tx, _state_rx) = watch::channel(initial.clone());
        let (events_tx, events_rx) = mpsc::channel(config.recv_buf_or_n.max(1));
        (
            Arc::new(Self {
                config,
                packer,
                cbs: CbsWaiting::new(),
                state: RwLock::new(initial),
                state_tx,
                events_tx,
                unloading: AtomicBool::new(false),
            }),
            events_rx,
        )
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state_tx.subscribe()
    }

    pub async fn current_state(&self) -> ClientState {
        self.state.read().await.clone()
    }

    #[must_use]
    pub fn is_unloading(&self) -> bool {
        self.unloading.load(Ordering::SeqCst)
    }

    pub fn set_unloading(&self, value: bool) {
        self.unloading.store(value, Ordering::SeqCst);
    }

    /// Publish a new `state_`, compute the transient transition flags, and
    /// emit `chsk/state` on the receive channel (spec §3, §4.G).
    pub async fn publish(&self, mutate: impl FnOnce(&mut ClientState)) -> StateTransition {
        let mut guard = self.state.write().await;
        let old = guard.clone();
        mutate(&mut guard);
        let new = guard.clone();
        drop(guard);

        let transition = StateTransition::between(&old, &new);
        let _ = self.state_tx.send(new.clone());
        let _ = self
            .events_tx
            .send(ClientEvent::State {
                old: Box::new(old),
                new: Box::new(new),
                transition,
            })
            .await;
        transition
    }

    pub async fn emit(&self, event: ClientEvent) {
        if self.events_tx.send(event).await.is_err() {
            tracing::warn!("chsk-client: receive channel closed, dropping event");
        }
    }
}
