//! Server adapter interface (spec §4.C).
//!
//! The registry and buffer engine never talk to a web server directly —
//! they talk to a [`ServerChannel`], a small capability set closed over by
//! whichever adapter binds an HTTP/WebSocket request. This mirrors the way
//! `rt_ui_log::UiLogger` stores its formatting behavior as a boxed closure
//! (`Arc<dyn Fn(String) -> T + Send + Sync>`) rather than requiring callers
//! to implement a trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// One underlying HTTP or WebSocket connection, as exposed by the adapter
/// binding a concrete web server (spec §4.C).
///
/// `send` returns `false` (and never panics or raises) if the channel is
/// already closed. For WebSocket transports this writes a frame; for
/// long-polling Ajax it writes the HTTP response body and implicitly
/// closes the channel. `close` is idempotent.
pub struct ServerChannel {
    id: u64,
    send: Box<dyn Fn(String) -> BoxFuture<'static, bool> + Send + Sync>,
    close: Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>,
}

impl ServerChannel {
    pub fn new<S, SFut, C, CFut>(send: S, close: C) -> Arc<Self>
    where
        S: Fn(String) -> SFut + Send + Sync + 'static,
        SFut: Future<Output = bool> + Send + 'static,
        C: Fn() -> CFut + Send + Sync + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            send: Box::new(move |packed| Box::pin(send(packed))),
            close: Box::new(move || Box::pin(close())),
        })
    }

    /// Stable identity used for CAS comparisons; two `Arc<ServerChannel>`
    /// created independently never collide.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn send(&self, packed: String) -> bool {
        (self.send)(packed).await
    }

    pub async fn close(&self) {
        (self.close)().await;
    }
}

impl std::fmt::Debug for ServerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerChannel").field("id", &self.id).finish()
    }
}

/// Identity-equal comparison for the optional channel slot stored in a
/// registry entry: `None == None`, two `Some`s compare by channel id.
#[must_use]
pub fn sch_eq(a: &Option<Arc<ServerChannel>>, b: &Option<Arc<ServerChannel>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.id() == b.id(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn send_and_close_delegate_to_closures() {
        let sent = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let sent2 = sent.clone();
        let closed2 = closed.clone();
        let sch = ServerChannel::new(
            move |_packed| {
                let sent = sent2.clone();
                async move {
                    sent.store(true, Ordering::SeqCst);
                    true
                }
            },
            move || {
                let closed = closed2.clone();
                async move {
                    closed.store(true, Ordering::SeqCst);
                }
            },
        );

        assert!(sch.send("payload".to_owned()).await);
        sch.close().await;
        assert!(sent.load(Ordering::SeqCst));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn sch_eq_treats_independent_channels_as_distinct() {
        let a = ServerChannel::new(|_| async { true }, || async {});
        let b = ServerChannel::new(|_| async { true }, || async {});
        assert!(sch_eq(&None, &None));
        assert!(sch_eq(&Some(a.clone()), &Some(a.clone())));
        assert!(!sch_eq(&Some(a), &Some(b)));
    }
}
