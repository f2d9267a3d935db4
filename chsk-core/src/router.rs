//! Router loop (spec §4.J): a long-running consumer of the receive
//! channel, invoking a user-supplied handler per message and reporting
//! handler errors through an injected (defaulted) error handler.
//!
//! Shaped after the teacher's `session.rs::run_session_loop`: a
//! `tokio::select! { biased; ... }` over a shutdown signal and the work
//! channel, except the shutdown signal here is a `tokio::sync::Notify`
//! (`stop()` is a one-shot call, not a watched boolean) since the router
//! has no state to publish back to observers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::error;

use crate::error::RouterError;
use crate::event_msg::EventMsg;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `event-msg-handler`: invoked once per received message.
pub type EventHandler = Arc<dyn Fn(EventMsg) -> BoxFuture<'static, Result<(), RouterError>> + Send + Sync>;

/// `error-handler`: invoked when the event handler returns `Err`. Defaults
/// to a `tracing::error!` log if not supplied.
pub type ErrorHandler = Arc<dyn Fn(RouterError) + Send + Sync>;

fn default_error_handler() -> ErrorHandler {
    Arc::new(|err: RouterError| {
        error!(error = %err, "chsk: event handler failed");
    })
}

/// A handle to a spawned router loop; `stop()` is idempotent.
pub struct Router {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Router {
    /// Spawn the loop over `rx`. Each message's handler invocation runs in
    /// its own task so a slow or blocking handler can't starve the
    /// consumer (spec §4.J "optionally wrap... in a thread/task").
    pub fn spawn(mut rx: mpsc::Receiver<EventMsg>, handler: EventHandler, error_handler: Option<ErrorHandler>) -> Self {
        let stop = Arc::new(Notify::new());
        let stop_signal = stop.clone();
        let error_handler = error_handler.unwrap_or_else(default_error_handler);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = stop_signal.notified() => break,
                    msg = rx.recv() => {
                        match msg {
                            Some(event_msg) => {
                                let handler = handler.clone();
                                let error_handler = error_handler.clone();
                                tokio::spawn(async move {
                                    if let Err(err) = handler(event_msg).await {
                                        // the error handler is itself guarded: a
                                        // panicking error handler cannot kill the
                                        // router loop since it runs in this
                                        // detached task, not the loop's own.
                                        error_handler(err);
                                    }
                                });
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Self { stop, task }
    }

    /// Closes the internal control channel; the loop exits on either this
    /// signal or the work channel closing.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}
