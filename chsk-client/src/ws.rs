//! Client WebSocket state machine (spec §4.G).
//!
//! Grounded in the teacher's `UplinkSession` (`services/forwarder/src/
//! uplink.rs`): a `tokio-tungstenite` client performing a hello/heartbeat
//! handshake over a split sink/stream, generalized from that one fixed
//! protocol into the spec's generic connect/reconnect/backoff/keep-alive/
//! callback machinery. The read-loop's `tokio::select!` over a keep-alive
//! deadline plus the socket stream mirrors `chsk_server::http::ws`'s
//! server-side connection loop almost verbatim — the two sides of one
//! protocol sharing one shape.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use uuid::Uuid;

use chsk_protocol::control::server_to_client;
use chsk_protocol::event::is_reserved;
use chsk_protocol::{read_wire, write_wire, CbId, Envelope, Event};

use crate::cbs::CbReply;
use crate::config::ClientType;
use crate::event::ClientEvent;
use crate::shared::Shared;
use crate::state::{ClientState, CloseReason, LastClose};
use crate::trans::{BoxFuture, ChskClient, SendMode};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as u64
}

/// A client WebSocket connection (spec §4.G).
pub struct WsClient {
    shared: Arc<Shared>,
    /// Minted fresh on every `connect`; a reconnect/keep-alive task checks
    /// it still matches before acting, so a superseded attempt (user
    /// disconnect, or a newer connect racing an old one) is silently
    /// ignored (spec §4.G "Connect", §5 "Cancellation").
    conn_id: AtomicU64,
    retry: AtomicU32,
    sink: Arc<Mutex<Option<WsSink>>>,
}

impl WsClient {
    #[must_use]
    pub fn new(shared: Arc<Shared>) -> Arc<Self> {
        Arc::new(Self {
            shared,
            conn_id: AtomicU64::new(0),
            retry: AtomicU32::new(0),
            sink: Arc::new(Mutex::new(None)),
        })
    }

    fn bump_conn_id(&self) -> u64 {
        self.conn_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_conn_id(&self) -> u64 {
        self.conn_id.load(Ordering::SeqCst)
    }

    async fn run_connection(self: Arc<Self>, my_conn_id: u64) {
        let url = self.shared.config.ws_url();
        let connect_result = tokio_tungstenite::connect_async(&url).await;

        if my_conn_id != self.current_conn_id() {
            return; // superseded before we even finished connecting
        }

        let (ws_stream, _response) = match connect_result {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "chsk-client: websocket connect failed");
                self.shared
                    .publish(|s| s.last_ws_error = Some(err.to_string()))
                    .await;
                self.schedule_reconnect(my_conn_id, CloseReason::WsError).await;
                return;
            }
        };

        let (sink, mut stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);
        self.retry.store(0, Ordering::SeqCst);

        let kalive = self.shared.config.ws_kalive_ms;
        let mut deadline = Instant::now() + kalive;
        // `force_close` already publishes its own specific reason (e.g.
        // `WsPingTimeout`); the generic post-loop publish below must not
        // clobber it with `Unexpected`/`WsError`.
        let mut closed_via_force_close = false;

        loop {
            if my_conn_id != self.current_conn_id() {
                return;
            }
            tokio::select! {
                biased;
                () = tokio::time::sleep_until(deadline) => {
                    deadline = Instant::now() + kalive;
                    if !self.clone().send_keepalive_ping(my_conn_id).await {
                        closed_via_force_close = true;
                        break;
                    }
                }
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            deadline = Instant::now() + kalive;
                            self.clone().handle_incoming(text.as_str()).await;
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            deadline = Instant::now() + kalive;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(Message::Binary(_) | Message::Frame(_))) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "chsk-client: websocket read error");
                            break;
                        }
                    }
                }
            }
        }

        *self.sink.lock().await = None;
        if my_conn_id != self.current_conn_id() {
            return; // a newer connect (or disconnect) already took over
        }
        if !closed_via_force_close {
            let was_open = self.shared.current_state().await.open;
            self.shared
                .publish(|s| {
                    s.open = false;
                    s.last_close = Some(LastClose {
                        udt: now_millis(),
                        reason: if was_open { CloseReason::Unexpected } else { CloseReason::WsError },
                    });
                    if !was_open {
                        s.last_ws_error = Some("websocket closed before handshake".to_owned());
                    }
                })
                .await;
        }
        self.schedule_reconnect(my_conn_id, CloseReason::Unexpected).await;
    }

    async fn schedule_reconnect(self: &Arc<Self>, my_conn_id: u64, reason: CloseReason) {
        if self.shared.is_unloading() {
            return;
        }
        if my_conn_id != self.current_conn_id() {
            return;
        }
        let retry = self.retry.fetch_add(1, Ordering::SeqCst);
        let backoff = (self.shared.config.backoff_ms_fn)(retry);
        self.shared
            .publish(|s| {
                s.udt_next_reconnect = Some(now_millis() + backoff.as_millis() as u64);
                if matches!(reason, CloseReason::WsError) {
                    s.last_ws_close = Some("ws-error".to_owned());
                }
            })
            .await;
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if my_conn_id != this.current_conn_id() || this.shared.is_unloading() {
                return;
            }
            Box::pin(this.run_connection(my_conn_id)).await;
        });
    }

    async fn handle_incoming(self: Arc<Self>, text: &str) {
        let envelope = read_wire(self.shared.packer.as_ref(), text);

        if let Some(event) = as_control_event(&envelope.value) {
            if event.id == server_to_client::HANDSHAKE {
                self.receive_handshake(event).await;
                return;
            }
            if event.id == server_to_client::WS_PING {
                // Server's own keep-alive probe: no reply expected, only activity.
                debug!("chsk-client: received server keep-alive ping");
                return;
            }
        }

        if let Some(cb_id) = &envelope.cb_id {
            if let CbId::Uuid(uuid) = cb_id {
                let reply = value_to_cb_reply(&envelope.value);
                if !self.shared.cbs.resolve(uuid, reply) {
                    warn!(cb_uuid = %uuid, "chsk-client: reply for unknown or already-resolved callback");
                }
                return;
            }
        }

        // Otherwise: an ordered batch of buffered events (spec §4.G "Receive" (d)).
        let Some(batch) = envelope.value.as_array() else {
            warn!("chsk-client: non-handshake, non-cb payload was not an array batch");
            return;
        };
        for raw in batch {
            let event = Event::from_received(raw.clone());
            if is_reserved(&event.id) {
                warn!(event_id = %event.id, "chsk-client: dropping reserved-namespace event from batch");
                continue;
            }
            self.shared.emit(ClientEvent::Msg(event)).await;
        }
    }

    async fn receive_handshake(self: Arc<Self>, event: Event) {
        let Some(data) = event.data else {
            warn!("chsk-client: malformed handshake frame (no data)");
            return;
        };
        let Some(triple) = data.as_array() else {
            warn!("chsk-client: malformed handshake frame (data not an array)");
            return;
        };
        let uid = triple.first().and_then(Value::as_str).unwrap_or_default().to_owned();
        let handshake_data = triple.get(2).cloned().unwrap_or(Value::Null);

        let was_ever_opened = self.shared.current_state().await.ever_opened;
        self.shared
            .publish(|s| {
                s.uid = Some(uid.clone());
                s.handshake_data = handshake_data.clone();
                s.open = true;
                s.ever_opened = true;
                s.udt_next_reconnect = None;
            })
            .await;
        self.retry.store(0, Ordering::SeqCst);
        self.shared
            .emit(ClientEvent::Handshake {
                uid,
                handshake_data,
                first_handshake: !was_ever_opened,
            })
            .await;
    }

    /// Client-initiated keep-alive (spec §4.G "Keep-alive"): sends
    /// `[chsk/ws-ping]` with a cb expecting `"pong"`; if the reply doesn't
    /// arrive (or resolves to `:chsk/timeout`) within
    /// `ws-kalive-ping-timeout-ms`, the socket is cycled with reason
    /// `:ws-ping-timeout`.
    async fn send_keepalive_ping(self: Arc<Self>, my_conn_id: u64) -> bool {
        let cb_uuid = Uuid::new_v4().simple().to_string();
        let rx = self.shared.cbs.register(cb_uuid.clone());
        let wire = write_wire(
            self.shared.packer.as_ref(),
            &Envelope::with_cb(Event::new(server_to_client::WS_PING, None).to_value(), CbId::Uuid(cb_uuid.clone())),
        );
        if !self.write_frame(wire).await {
            return false;
        }
        let timeout = self.shared.config.ws_kalive_ping_timeout_ms;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(CbReply::Value(Value::String(s)))) if s == "pong" => true,
            _ => {
                self.shared.cbs.resolve(&cb_uuid, CbReply::Timeout);
                if my_conn_id == self.current_conn_id() {
                    warn!("chsk-client: keep-alive ping timed out, cycling socket");
                    self.force_close(CloseReason::WsPingTimeout).await;
                }
                false
            }
        }
    }

    async fn write_frame(&self, wire: String) -> bool {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send(Message::Text(wire.into())).await.is_ok(),
            None => false,
        }
    }

    async fn force_close(&self, reason: CloseReason) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.shared
            .publish(|s| {
                s.open = false;
                s.last_close = Some(LastClose {
                    udt: now_millis(),
                    reason,
                });
            })
            .await;
    }
}

fn as_control_event(value: &Value) -> Option<Event> {
    let arr = value.as_array()?;
    let id = arr.first()?.as_str()?;
    if id.starts_with("chsk/") {
        Event::validate(value).ok()
    } else {
        None
    }
}

fn value_to_cb_reply(value: &Value) -> CbReply {
    match value.as_str() {
        Some(s) if s == chsk_protocol::control::cb_reply::TIMEOUT => CbReply::Timeout,
        Some(s) if s == chsk_protocol::control::cb_reply::ERROR => CbReply::Error("server reported an error".to_owned()),
        _ => CbReply::Value(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use serde_json::json;

    #[test]
    fn as_control_event_recognizes_chsk_namespace_only() {
        let control = json!([chsk_protocol::control::server_to_client::WS_PING]);
        assert!(as_control_event(&control).is_some());

        let app_event = json!(["app/ping"]);
        assert!(as_control_event(&app_event).is_none());
    }

    #[test]
    fn value_to_cb_reply_maps_sentinels() {
        assert!(matches!(
            value_to_cb_reply(&json!(chsk_protocol::control::cb_reply::TIMEOUT)),
            CbReply::Timeout
        ));
        assert!(matches!(
            value_to_cb_reply(&json!(chsk_protocol::control::cb_reply::ERROR)),
            CbReply::Error(_)
        ));
        match value_to_cb_reply(&json!(42)) {
            CbReply::Value(v) => assert_eq!(v, json!(42)),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fresh_client_reports_closed_state() {
        let (shared, _rx) = Shared::new(ClientConfig::new("example.test", "/chsk", "c1"), Arc::new(chsk_protocol::JsonPacker));
        let client = WsClient::new(shared);
        assert!(!client.state().await.open);
    }

    #[tokio::test]
    async fn send_while_closed_returns_closed_reply() {
        let (shared, _rx) = Shared::new(ClientConfig::new("example.test", "/chsk", "c1"), Arc::new(chsk_protocol::JsonPacker));
        let client = WsClient::new(shared);
        let reply = client.send(json!(["app/ping"]), SendMode::FireAndForget).await;
        assert!(matches!(reply, Some(CbReply::Closed)));
    }
}

impl ChskClient for WsClient {
    fn state(&self) -> BoxFuture<'_, ClientState> {
        Box::pin(async move { self.shared.current_state().await })
    }

    fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.shared.subscribe_state()
    }

    fn connect(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if self.shared.is_unloading() {
                return;
            }
            let my_conn_id = self.bump_conn_id();
            let this = self.clone();
            tokio::spawn(async move { this.run_connection(my_conn_id).await });
        })
    }

    fn disconnect(&self) {
        // Invalidate conn_id so every in-flight reconnect/keep-alive task
        // for the old connection sees the mismatch and exits (spec §5
        // "Cancellation", §8 "no new connection attempt is made").
        self.conn_id.fetch_add(1, Ordering::SeqCst);
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Some(mut sink) = sink.lock().await.take() {
                let _ = sink.close().await;
            }
        });
    }

    fn reconnect(self: Arc<Self>) -> BoxFuture<'static, ()> {
        self.connect()
    }

    fn break_connection(&self) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Some(mut sink) = sink.lock().await.take() {
                let _ = sink.close().await;
            }
        });
    }

    fn send(self: Arc<Self>, event: Value, mode: SendMode) -> BoxFuture<'static, Option<CbReply>> {
        Box::pin(async move {
            if !self.shared.current_state().await.open {
                return Some(CbReply::Closed);
            }
            let cb_uuid = match mode {
                SendMode::WithReply { .. } => Some(Uuid::new_v4().simple().to_string()),
                SendMode::FireAndForget => None,
            };
            let envelope = match &cb_uuid {
                Some(id) => Envelope::with_cb(event, CbId::Uuid(id.clone())),
                None => Envelope::new(event),
            };
            let wire = write_wire(self.shared.packer.as_ref(), &envelope);

            let rx = cb_uuid.as_ref().map(|id| self.shared.cbs.register(id.clone()));
            if !self.write_frame(wire).await {
                if let Some(id) = &cb_uuid {
                    self.shared.cbs.resolve(id, CbReply::Error("write failed".to_owned()));
                }
                let this = self.clone();
                tokio::spawn(async move {
                    this.schedule_reconnect(this.current_conn_id(), CloseReason::WsError).await;
                });
                return Some(CbReply::Error("write failed".to_owned()));
            }

            let (Some(rx), SendMode::WithReply { timeout }) = (rx, mode) else {
                return None;
            };
            let cb_uuid = cb_uuid.expect("WithReply always mints a cb-uuid");
            let cbs_timeout_guard = self.shared.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cbs_timeout_guard.cbs.resolve(&cb_uuid, CbReply::Timeout);
            });
            Some(rx.await.unwrap_or(CbReply::Closed))
        })
    }
}
