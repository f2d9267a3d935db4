//! Client Ajax long-poll state machine (spec §4.H).
//!
//! Grounded in the teacher's production use of `reqwest` as a client
//! dependency (`services/receiver/Cargo.toml`, where the receiver talks to
//! the dashboard server over plain HTTP); here the same client drives the
//! long-poll GET / send POST cycle instead of a one-shot upload.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

use chsk_protocol::control::server_to_client;
use chsk_protocol::event::is_reserved;
use chsk_protocol::{read_wire, write_wire, CbId, Envelope, Event};

use crate::cbs::CbReply;
use crate::event::ClientEvent;
use crate::shared::Shared;
use crate::state::{ClientState, CloseReason, LastClose};
use crate::trans::{BoxFuture, ChskClient, SendMode};

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as u64
}

/// A client Ajax long-poll connection (spec §4.H). No independent
/// keep-alive: the long-poll timeout/repoll cycle subsumes it.
pub struct AjaxClient {
    shared: Arc<Shared>,
    http: Client,
    /// Bumped by `disconnect`/`reconnect`; the poll loop checks it still
    /// matches before scheduling its next repoll (spec §5 "Cancellation").
    generation: AtomicU64,
    retry: AtomicU32,
}

impl AjaxClient {
    #[must_use]
    pub fn new(shared: Arc<Shared>) -> Arc<Self> {
        Arc::new(Self {
            shared,
            http: Client::new(),
            generation: AtomicU64::new(0),
            retry: AtomicU32::new(0),
        })
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Attach the configured extra headers plus `X-CSRF-Token` (spec §6
    /// "Headers"), shared by both the long-poll GET and the send POST.
    fn apply_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.shared.config.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(csrf) = &self.shared.config.csrf_token {
            builder = builder.header("X-CSRF-Token", csrf.as_str());
        }
        builder
    }

    async fn poll_loop(self: Arc<Self>, my_generation: u64) {
        loop {
            if my_generation != self.current_generation() || self.shared.is_unloading() {
                return;
            }
            let is_open = self.shared.current_state().await.open;
            let extra: Vec<(&str, String)> = if is_open {
                vec![("udt", now_millis().to_string())]
            } else {
                vec![("udt", now_millis().to_string()), ("handshake?", "true".to_owned())]
            };
            let url = self.shared.config.ajax_url(&extra);

            let request = self.apply_headers(self.http.get(&url).timeout(self.shared.config.ajax_poll_timeout_ms));
            let response = request.send().await;
            match response {
                Ok(resp) if resp.status().is_success() => {
                    let body = match resp.text().await {
                        Ok(body) => body,
                        Err(err) => {
                            warn!(error = %err, "chsk-client: ajax long-poll body read failed");
                            self.mark_unexpected_close_and_backoff(my_generation).await;
                            continue;
                        }
                    };
                    self.handle_poll_response(&body).await;
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), "chsk-client: ajax long-poll returned an error status");
                    self.mark_unexpected_close_and_backoff(my_generation).await;
                }
                Err(err) if err.is_timeout() => {
                    // Server held the long-poll open past the HTTP client's
                    // own timeout: immediately repoll without changing
                    // open-state (spec §4.H).
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "chsk-client: ajax long-poll request failed");
                    self.mark_unexpected_close_and_backoff(my_generation).await;
                }
            }
        }
    }

    async fn mark_unexpected_close_and_backoff(self: &Arc<Self>, my_generation: u64) {
        let was_open = self.shared.current_state().await.open;
        if was_open {
            self.shared
                .publish(|s| {
                    s.open = false;
                    s.last_close = Some(LastClose {
                        udt: now_millis(),
                        reason: CloseReason::Unexpected,
                    });
                })
                .await;
        }
        if my_generation != self.current_generation() || self.shared.is_unloading() {
            return;
        }
        let retry = self.retry.fetch_add(1, Ordering::SeqCst);
        let backoff = (self.shared.config.backoff_ms_fn)(retry);
        self.shared
            .publish(|s| s.udt_next_reconnect = Some(now_millis() + backoff.as_millis() as u64))
            .await;
        tokio::time::sleep(backoff).await;
    }

    async fn handle_poll_response(self: &Arc<Self>, body: &str) {
        let envelope = read_wire(self.shared.packer.as_ref(), body);

        if let Some(event) = as_control_event(&envelope.value) {
            if event.id == server_to_client::HANDSHAKE {
                self.receive_handshake(event).await;
                return;
            }
            if event.id == server_to_client::TIMEOUT {
                // No-op: nothing to deliver this cycle, repoll immediately.
                return;
            }
        }

        let Some(batch) = envelope.value.as_array() else {
            warn!("chsk-client: ajax long-poll body was not a handshake, timeout, or event batch");
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

    async fn receive_handshake(self: &Arc<Self>, event: Event) {
        let Some(data) = event.data else { return };
        let Some(triple) = data.as_array() else { return };
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::shared::Shared;
    use serde_json::json;

    #[test]
    fn as_control_event_recognizes_chsk_namespace_only() {
        assert!(as_control_event(&json!([server_to_client::TIMEOUT])).is_some());
        assert!(as_control_event(&json!(["app/ping"])).is_none());
    }

    #[tokio::test]
    async fn fresh_client_reports_closed_state() {
        let (shared, _rx) = Shared::new(ClientConfig::new("example.test", "/chsk", "c1"), Arc::new(chsk_protocol::JsonPacker));
        let client = AjaxClient::new(shared);
        assert!(!client.state().await.open);
    }

    #[tokio::test]
    async fn apply_headers_attaches_csrf_token() {
        let mut config = ClientConfig::new("example.test", "/chsk", "c1");
        config.csrf_token = Some("tok".to_owned());
        let (shared, _rx) = Shared::new(config, Arc::new(chsk_protocol::JsonPacker));
        let client = AjaxClient::new(shared);
        let builder = client.apply_headers(client.http.get("http://example.test/chsk"));
        let request = builder.build().expect("request builds");
        assert_eq!(request.headers().get("X-CSRF-Token").unwrap(), "tok");
    }
}

impl ChskClient for AjaxClient {
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
            let my_generation = self.bump_generation();
            let this = self.clone();
            tokio::spawn(async move { this.poll_loop(my_generation).await });
        })
    }

    fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn reconnect(self: Arc<Self>) -> BoxFuture<'static, ()> {
        self.connect()
    }

    fn break_connection(&self) {
        // Ajax has no persistent socket to sever; the in-flight long-poll
        // request is simply left to its own HTTP-level timeout. Bumping
        // the generation makes the loop's *next* iteration treat itself
        // as superseded, which is the closest analog available.
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn send(self: Arc<Self>, event: Value, mode: SendMode) -> BoxFuture<'static, Option<CbReply>> {
        Box::pin(async move {
            let cb_uuid = match mode {
                SendMode::WithReply { .. } => Some(Uuid::new_v4().simple().to_string()),
                SendMode::FireAndForget => None,
            };
            let envelope = match &cb_uuid {
                Some(_) => Envelope::with_cb(event, CbId::AjaxCb),
                None => Envelope::new(event),
            };
            let wire = write_wire(self.shared.packer.as_ref(), &envelope);

            let extra = [("udt", now_millis().to_string())];
            let url = self.shared.config.ajax_url(&extra);
            let request = self.apply_headers(self.http.post(&url).body(wire));
            let response = request.send().await;

            match response {
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(body) => match mode {
                        SendMode::FireAndForget => None,
                        SendMode::WithReply { .. } => {
                            let envelope = read_wire(self.shared.packer.as_ref(), &body);
                            Some(match envelope.value.as_str() {
                                Some(s) if s == chsk_protocol::control::cb_reply::TIMEOUT => CbReply::Timeout,
                                Some(s) if s == chsk_protocol::control::cb_reply::DUMMY_CB_200 => CbReply::Value(Value::Null),
                                _ => CbReply::Value(envelope.value),
                            })
                        }
                    },
                    Err(err) => Some(CbReply::Error(err.to_string())),
                },
                Ok(resp) => Some(CbReply::Error(format!("ajax send returned status {}", resp.status()))),
                Err(err) => Some(CbReply::Error(err.to_string())),
            }
        })
    }
}
