//! The transport-polymorphic capability set (spec §9 "Polymorphism over
//! transport"): `{connect, disconnect, reconnect, break, send}`, realized
//! by three tagged variants (WebSocket, Ajax long-poll, Auto) rather than
//! deep inheritance.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cbs::CbReply;
use crate::state::ClientState;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Whether a `send` expects a reply (spec §4.G "Send": "mint a fresh
/// cb-uuid iff a callback was requested").
#[derive(Debug, Clone, Copy)]
pub enum SendMode {
    FireAndForget,
    WithReply { timeout: Duration },
}

pub trait ChskClient: Send + Sync {
    /// Current published `state_` snapshot.
    fn state(&self) -> BoxFuture<'_, ClientState>;

    /// Subscribe to every future `state_` publish.
    fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ClientState>;

    /// Start (or restart) the connection loop. Idempotent while already
    /// connecting/open.
    fn connect(self: Arc<Self>) -> BoxFuture<'static, ()>;

    /// User-initiated disconnect (spec §8 "After `disconnect()`..., no new
    /// connection attempt is made"): marks the connection's identity token
    /// stale so in-flight reconnect/keep-alive loops see the mismatch and
    /// exit, and closes the live transport if any.
    fn disconnect(&self);

    /// Force a fresh connect cycle, e.g. after `disconnect()`.
    fn reconnect(self: Arc<Self>) -> BoxFuture<'static, ()>;

    /// Simulate an abrupt transport failure (spec §9 `break`): used by
    /// tests exercising reconnect/backoff and the auto-downgrade path
    /// without needing a real network fault.
    fn break_connection(&self);

    /// `send(event, ?timeout)` (spec §4.G/§4.H "Send"). Returns `None` for
    /// fire-and-forget sends that weren't rejected outright; `Some` for
    /// any send that expected a reply.
    fn send(self: Arc<Self>, event: Value, mode: SendMode) -> BoxFuture<'static, Option<CbReply>>;
}
