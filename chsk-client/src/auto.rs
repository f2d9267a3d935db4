//! Client auto wrapper (spec §4.I).
//!
//! Starts as a [`WsClient`]; the first time the socket fails to ever open
//! (`last_ws_error` set while `ever_opened` is still false), permanently
//! swaps the delegate for an [`AjaxClient`] sharing the same [`Shared`]
//! state. No attempt is ever made to upgrade back to WebSocket (spec §8
//! "auto-downgrade fires at most once per client lifetime").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

use crate::ajax::AjaxClient;
use crate::cbs::CbReply;
use crate::config::ClientConfig;
use crate::shared::Shared;
use crate::state::{ClientState, CloseReason, LastClose};
use crate::trans::{BoxFuture, ChskClient, SendMode};
use crate::ws::WsClient;

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as u64
}

pub struct AutoClient {
    shared: Arc<Shared>,
    /// Plain `std::sync::RwLock`, not `tokio::sync::RwLock`: readers only
    /// ever clone the `Arc` out and never hold the guard across an await
    /// point, so `disconnect`/`break_connection` can stay synchronous like
    /// every other `ChskClient` impl.
    delegate: RwLock<Arc<dyn ChskClient>>,
    downgraded: AtomicBool,
}

impl AutoClient {
    /// Build the auto client and the application's receive channel. The
    /// initial delegate is always a [`WsClient`] regardless of
    /// `config.client_type` (callers who want a fixed transport should
    /// construct [`WsClient`]/[`AjaxClient`] directly instead of this
    /// wrapper).
    #[must_use]
    pub fn new(config: ClientConfig, packer: Arc<dyn chsk_protocol::Packer>) -> (Arc<Self>, tokio::sync::mpsc::Receiver<crate::event::ClientEvent>) {
        let (shared, events_rx) = Shared::new(config, packer);
        let ws = WsClient::new(shared.clone()) as Arc<dyn ChskClient>;
        let auto = Arc::new(Self {
            shared,
            delegate: RwLock::new(ws),
            downgraded: AtomicBool::new(false),
        });
        (auto, events_rx)
    }

    fn current_delegate(&self) -> Arc<dyn ChskClient> {
        self.delegate.read().expect("auto client delegate lock poisoned").clone()
    }

    /// Spawn the one-shot watcher that fires the downgrade (spec §4.I).
    fn spawn_downgrade_watch(self: &Arc<Self>) {
        let this = self.clone();
        let mut state_rx = self.shared.subscribe_state();
        tokio::spawn(async move {
            loop {
                if state_rx.changed().await.is_err() {
                    return;
                }
                if this.downgraded.load(Ordering::SeqCst) {
                    return; // already swapped, nothing left to watch for
                }
                let snapshot = state_rx.borrow().clone();
                if snapshot.last_ws_error.is_some() && !snapshot.ever_opened {
                    this.downgrade().await;
                    return;
                }
            }
        });
    }

    async fn downgrade(self: &Arc<Self>) {
        if self.downgraded.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("chsk-client: websocket never opened, downgrading to ajax long-poll permanently");

        self.current_delegate().disconnect();

        self.shared
            .publish(|s| {
                s.client_type = crate::config::ClientType::Ajax;
                s.last_close = Some(LastClose {
                    udt: now_millis(),
                    reason: CloseReason::DowngradingWsToAjax,
                });
            })
            .await;

        let ajax = AjaxClient::new(self.shared.clone()) as Arc<dyn ChskClient>;
        *self.delegate.write().expect("auto client delegate lock poisoned") = ajax.clone();
        ajax.connect().await;
    }
}

impl ChskClient for AutoClient {
    fn state(&self) -> BoxFuture<'_, ClientState> {
        Box::pin(async move { self.shared.current_state().await })
    }

    fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.shared.subscribe_state()
    }

    fn connect(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.spawn_downgrade_watch();
            self.current_delegate().connect().await;
        })
    }

    fn disconnect(&self) {
        self.current_delegate().disconnect();
    }

    fn reconnect(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.current_delegate().reconnect().await })
    }

    fn break_connection(&self) {
        self.current_delegate().break_connection();
    }

    fn send(self: Arc<Self>, event: Value, mode: SendMode) -> BoxFuture<'static, Option<CbReply>> {
        Box::pin(async move { self.current_delegate().send(event, mode).await })
    }
}
