//! Ajax long-poll GET and POST entry points (spec §4.F).
//!
//! Each is backed by an ephemeral, one-shot [`ServerChannel`] wrapping a
//! `tokio::sync::oneshot` pair: a single completed HTTP response *is* the
//! channel here, the same abstraction the registry/buffer engine use for a
//! persistent WebSocket connection in `ws.rs`. Neither channel is ever
//! registered for more than the lifetime of one request.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use chsk_core::registry::{Expected, Transport};
use chsk_core::{EventMsg, ReplyFn, ServerChannel};
use chsk_protocol::control::client_to_server;
use chsk_protocol::{read_wire, Event, Packer};

use crate::http::ws::RequestPartsLite;
use crate::security::{preflight, require_client_id};
use crate::state::AppState;
use crate::wire::{dummy_cb_200_wire, handshake_wire, timeout_wire};

/// A `ServerChannel` whose `send` resolves the paired receiver with the
/// packed wire string and whose `close` resolves it with `chsk/closed`;
/// only the first of either wins, matching `oneshot::Sender`'s
/// consume-once semantics.
fn oneshot_channel(packer: Arc<dyn Packer>) -> (Arc<ServerChannel>, oneshot::Receiver<String>) {
    let (tx, rx) = oneshot::channel::<String>();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let tx_close = tx.clone();
    let sch = ServerChannel::new(
        move |packed| {
            let tx = tx.clone();
            async move {
                match tx.lock().await.take() {
                    Some(tx) => tx.send(packed).is_ok(),
                    None => false,
                }
            }
        },
        move || {
            let tx = tx_close.clone();
            let packer = packer.clone();
            async move {
                if let Some(tx) = tx.lock().await.take() {
                    let _ = tx.send(crate::wire::closed_wire(packer.as_ref()));
                }
            }
        },
    );
    (sch, rx)
}

/// The Ajax half of `chsk_get_handler` (spec §4.F): the first request for a
/// `(uid, cid)` pair, or one explicitly flagged `handshake?=true`, returns
/// the handshake frame immediately and registers a channel-less entry.
/// Every later GET is a long-poll: it attaches an ephemeral channel and
/// waits up to `lp-timeout-ms` for something to fan out to it. Either way
/// the response nils the channel again and schedules a grace-close detach,
/// the same as a WebSocket's `onClose`.
pub async fn handle_ajax_long_poll(state: AppState, params: HashMap<String, String>, uid: String, cid: String) -> Response {
    let handshake_requested = params.get("handshake?").map(String::as_str) == Some("true");
    let prior = state.hub.registry.snapshot(Transport::Ajax, &uid, &cid).await;

    if handshake_requested || prior.is_none() {
        let outcome = state
            .hub
            .registry
            .attach(Transport::Ajax, &uid, &cid, Expected::Any, None)
            .await;
        if outcome.uid_entered_any {
            state
                .hub
                .emit_control(&uid, &cid, Transport::Ajax, client_to_server::UIDPORT_OPEN)
                .await;
        }
        let handshake_data = (state.handshake_data_fn)(&uid);
        return handshake_wire(state.hub.packer.as_ref(), &uid, handshake_data).into_response();
    }

    let (sch, rx) = oneshot_channel(state.hub.packer.clone());
    state
        .hub
        .registry
        .attach(Transport::Ajax, &uid, &cid, Expected::Any, Some(sch.clone()))
        .await;

    let outcome = tokio::time::timeout(state.hub.config.lp_timeout_ms, rx).await;
    if let Ok(Ok(body)) = outcome {
        state
            .hub
            .registry
            .attach(Transport::Ajax, &uid, &cid, Expected::Exact(Some(sch.clone())), None)
            .await;
        state.hub.schedule_grace_detach(Transport::Ajax, uid.clone(), cid.clone());
        return body.into_response();
    }
    if let Ok(Err(_)) = outcome {
        warn!(uid, cid, "chsk: ajax long-poll channel dropped without a response");
    }
    state
        .hub
        .registry
        .attach(Transport::Ajax, &uid, &cid, Expected::Exact(Some(sch)), None)
        .await;
    state.hub.schedule_grace_detach(Transport::Ajax, uid.clone(), cid.clone());
    timeout_wire(state.hub.packer.as_ref()).into_response()
}

/// The Ajax send path (spec §4.F `POST`): parse one event off the body,
/// dispatch it, and either reply immediately with the dummy-200 sentinel
/// (no callback requested) or hold the response open up to `lp-timeout-ms`
/// waiting for the application's `reply-fn` call.
pub async fn ajax_post_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    parts: RequestPartsLite,
    body: String,
) -> Response {
    if let Err(resp) = preflight(&parts.0, &params, &state.security) {
        return resp;
    }
    let cid = match require_client_id(&params) {
        Ok(cid) => cid,
        Err(resp) => return resp,
    };
    let uid = (state.user_id_fn)(&parts.0, &params);

    let envelope = read_wire(state.hub.packer.as_ref(), &body);
    let event = Event::from_received(envelope.value);

    match envelope.cb_id {
        Some(cb_id) => {
            let (sch, rx) = oneshot_channel(state.hub.packer.clone());
            let reply_fn = ReplyFn::new(sch, cb_id, state.hub.packer.clone());
            state
                .hub
                .dispatch(EventMsg::new(uid.clone(), cid.clone(), Transport::Ajax, event, Some(reply_fn)))
                .await;
            match tokio::time::timeout(state.hub.config.lp_timeout_ms, rx).await {
                Ok(Ok(reply_body)) => reply_body.into_response(),
                _ => timeout_wire(state.hub.packer.as_ref()).into_response(),
            }
        }
        None => {
            state
                .hub
                .dispatch(EventMsg::new(uid, cid, Transport::Ajax, event, None))
                .await;
            dummy_cb_200_wire(state.hub.packer.as_ref()).into_response()
        }
    }
}
