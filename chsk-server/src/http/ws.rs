//! Ajax GET / WebSocket handshake entry point (spec §4.F): both share the
//! same URL and query params, so one handler decides between them the way
//! `axum`'s `Option<WebSocketUpgrade>` extractor falls back to `None` when
//! the request isn't a real upgrade.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use chsk_core::registry::{Expected, Transport};
use chsk_core::{EventMsg, ReplyFn, ServerChannel};
use chsk_protocol::control::{client_to_server, server_to_client};
use chsk_protocol::{read_wire, write_wire, CbId, Envelope, Event};

use crate::http::ajax::handle_ajax_long_poll;
use crate::security::{preflight, require_client_id};
use crate::state::AppState;
use crate::wire::{handshake_wire, ws_ping_wire};

pub async fn chsk_get_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    parts: RequestPartsLite,
    ws_upgrade: Option<WebSocketUpgrade>,
) -> Response {
    if let Err(resp) = preflight(&parts.0, &params, &state.security) {
        return resp;
    }
    let cid = match require_client_id(&params) {
        Ok(cid) => cid,
        Err(resp) => return resp,
    };
    let uid = (state.user_id_fn)(&parts.0, &params);

    match ws_upgrade {
        Some(upgrade) => {
            let state = state.clone();
            upgrade
                .on_upgrade(move |socket| handle_ws_connection(socket, state, uid, cid))
                .into_response()
        }
        None => handle_ajax_long_poll(state, params, uid, cid).await.into_response(),
    }
}

/// `axum::http::request::Parts` isn't directly usable as a handler
/// argument alongside `Query`/`HeaderMap` extraction without consuming the
/// request; this thin wrapper extracts just the `Parts` the security
/// checks need.
pub struct RequestPartsLite(pub Parts);

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for RequestPartsLite {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestPartsLite(parts.clone()))
    }
}

async fn handle_ws_connection(socket: WebSocket, state: AppState, uid: String, cid: String) {
    let (sink, mut stream) = socket.split();
    let sink = Arc::new(Mutex::new(sink));

    let sink_for_send = sink.clone();
    let sink_for_close = sink.clone();
    let sch = ServerChannel::new(
        move |packed| {
            let sink = sink_for_send.clone();
            async move { sink.lock().await.send(Message::Text(packed.into())).await.is_ok() }
        },
        move || {
            let sink = sink_for_close.clone();
            async move {
                let _ = sink.lock().await.close().await;
            }
        },
    );

    let outcome = state
        .hub
        .registry
        .attach(Transport::Ws, &uid, &cid, Expected::Any, Some(sch.clone()))
        .await;
    if outcome.uid_entered_any {
        state
            .hub
            .emit_control(&uid, &cid, Transport::Ws, client_to_server::UIDPORT_OPEN)
            .await;
    }
    info!(uid, cid, "chsk: websocket connected");

    let handshake_data = (state.handshake_data_fn)(&uid);
    let wire = handshake_wire(state.hub.packer.as_ref(), &uid, handshake_data);
    if !sch.send(wire).await {
        warn!(uid, cid, "chsk: failed to send handshake frame");
    }

    let kalive = state.hub.config.ws_kalive_ms;
    let mut deadline = Instant::now() + kalive;

    loop {
        tokio::select! {
            biased;
            () = tokio::time::sleep_until(deadline) => {
                deadline = Instant::now() + kalive;
                if !sch.send(ws_ping_wire(state.hub.packer.as_ref())).await {
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        deadline = Instant::now() + kalive;
                        state.hub.registry.touch(Transport::Ws, &uid, &cid).await;
                        handle_incoming_text(&state, &uid, &cid, &sch, text.as_str()).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        deadline = Instant::now() + kalive;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(err)) => {
                        warn!(uid, cid, error = %err, "chsk: websocket read error");
                        break;
                    }
                }
            }
        }
    }

    state
        .hub
        .registry
        .attach(Transport::Ws, &uid, &cid, Expected::Exact(Some(sch)), None)
        .await;
    state.hub.schedule_grace_detach(Transport::Ws, uid.clone(), cid.clone());
    info!(uid, cid, "chsk: websocket closed, grace-detach scheduled");
}

async fn handle_incoming_text(state: &AppState, uid: &str, cid: &str, sch: &Arc<ServerChannel>, text: &str) {
    let envelope = read_wire(state.hub.packer.as_ref(), text);
    let event = Event::from_received(envelope.value);

    if event.id == client_to_server::WS_PING {
        if let Some(cb_id) = envelope.cb_id {
            let reply = ReplyFn::new(sch.clone(), cb_id, state.hub.packer.clone());
            reply.reply(serde_json::Value::String("pong".to_owned())).await;
        }
        return;
    }

    let reply_fn = envelope.cb_id.map(|cb_id: CbId| ReplyFn::new(sch.clone(), cb_id, state.hub.packer.clone()));
    state
        .hub
        .dispatch(EventMsg::new(uid.to_owned(), cid.to_owned(), Transport::Ws, event, reply_fn))
        .await;
}
