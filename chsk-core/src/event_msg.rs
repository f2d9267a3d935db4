//! `EventMsg`: the value handed to the router loop and to application
//! reply callbacks (spec §3 "expanded"), analogous to Sente's `event-msg`
//! map and to the teacher's pattern of carrying a reply capability
//! alongside a command (`state.rs::ForwarderCommand::ConfigGet`).

use chsk_protocol::Event;

use crate::registry::{Cid, Transport, Uid};
use crate::reply::ReplyFn;

#[derive(Debug)]
pub struct EventMsg {
    pub uid: Uid,
    pub cid: Cid,
    pub transport: Transport,
    pub event: Event,
    /// `Some` iff the client attached a non-nil callback id.
    pub reply_fn: Option<ReplyFn>,
}

impl EventMsg {
    #[must_use]
    pub fn new(uid: Uid, cid: Cid, transport: Transport, event: Event, reply_fn: Option<ReplyFn>) -> Self {
        Self {
            uid,
            cid,
            transport,
            event,
            reply_fn,
        }
    }

    #[must_use]
    pub fn has_reply_fn(&self) -> bool {
        self.reply_fn.is_some()
    }
}
