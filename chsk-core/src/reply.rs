//! The reply-fn capability handed to application code alongside a received
//! event that carried a callback id (spec §4.E "Reply-side replies").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chsk_protocol::{write_wire, CbId, Envelope, Packer};
use serde_json::Value;

use crate::adapter::ServerChannel;

/// Single-shot: the first call wins, every later call is a silent no-op,
/// guarded by an internal compare-and-set rather than requiring `self` to
/// be consumed (callers hold it by reference from an `EventMsg`).
pub struct ReplyFn {
    sch: Arc<ServerChannel>,
    cb_id: CbId,
    packer: Arc<dyn Packer>,
    used: AtomicBool,
}

impl ReplyFn {
    #[must_use]
    pub fn new(sch: Arc<ServerChannel>, cb_id: CbId, packer: Arc<dyn Packer>) -> Self {
        Self {
            sch,
            cb_id,
            packer,
            used: AtomicBool::new(false),
        }
    }

    /// Pack `[value, cb-uuid]` and send on the originating channel. Returns
    /// `false` if already used or if the underlying send failed.
    pub async fn reply(&self, value: Value) -> bool {
        if self.used.swap(true, Ordering::SeqCst) {
            return false;
        }
        let envelope = Envelope::with_cb(value, self.cb_id.clone());
        let wire = write_wire(self.packer.as_ref(), &envelope);
        self.sch.send(wire).await
    }

    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ReplyFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyFn")
            .field("cb_id", &self.cb_id)
            .field("used", &self.is_used())
            .finish()
    }
}
