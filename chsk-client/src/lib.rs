//! chsk-client: the Rust-native client half of the channel socket subsystem
//! (spec §4.G–§4.I).
//!
//! Three transports share one [`ChskClient`] trait and one [`Shared`]
//! state/event hub: [`ws::WsClient`] (component G), [`ajax::AjaxClient`]
//! (component H), and [`auto::AutoClient`] (component I), which starts on
//! WebSocket and falls back to Ajax long-polling at most once per client
//! lifetime. `chsk_connect` is the single entry point, dispatching on
//! [`ClientType`] the same way `chsk_core::ChskHub::new` picks adapters
//! server-side.

pub mod ajax;
pub mod auto;
pub mod cbs;
pub mod config;
pub mod error;
pub mod event;
pub mod shared;
pub mod state;
pub mod trans;
pub mod ws;

pub use ajax::AjaxClient;
pub use auto::AutoClient;
pub use cbs::{CbReply, CbsWaiting};
pub use config::{BackoffFn, ClientConfig, ClientType};
pub use error::{ConnectError, SendError};
pub use event::ClientEvent;
pub use shared::Shared;
pub use state::{ClientState, CloseReason, LastClose, StateTransition};
pub use trans::{ChskClient, SendMode};
pub use ws::WsClient;

use std::sync::Arc;

use chsk_protocol::Packer;
use tokio::sync::mpsc;

/// Build a client for `config.client_type` (spec §4.I "the only
/// constructor an application needs"). Returns the polymorphic handle,
/// still disconnected until the caller invokes `connect()`, plus the
/// channel of [`ClientEvent`]s to drain.
#[must_use]
pub fn chsk_connect(config: ClientConfig, packer: Arc<dyn Packer>) -> (Arc<dyn ChskClient>, mpsc::Receiver<ClientEvent>) {
    match config.client_type {
        ClientType::Auto => {
            let (client, rx) = AutoClient::new(config, packer);
            let handle = client as Arc<dyn ChskClient>;
            (handle, rx)
        }
        ClientType::Ws => {
            let (shared, rx) = Shared::new(config, packer);
            (WsClient::new(shared) as Arc<dyn ChskClient>, rx)
        }
        ClientType::Ajax => {
            let (shared, rx) = Shared::new(config, packer);
            (AjaxClient::new(shared) as Arc<dyn ChskClient>, rx)
        }
    }
}
