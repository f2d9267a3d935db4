//! chsk-core: the transport-agnostic registry, buffer/fanout engine, and
//! router loop behind the channel socket subsystem (spec §4.C–§4.E, §4.J).
//!
//! Nothing in this crate knows about HTTP or axum; `chsk-server` supplies
//! the adapter implementations that close over a concrete web framework.

pub mod adapter;
pub mod buffer;
pub mod config;
pub mod error;
pub mod event_msg;
pub mod hub;
pub mod registry;
pub mod reply;
pub mod router;

pub use adapter::ServerChannel;
pub use buffer::BufferEngine;
pub use config::{AllowedOrigins, ServerConfig};
pub use error::{RouterError, SendError};
pub use event_msg::EventMsg;
pub use hub::ChskHub;
pub use registry::{Cid, ConnEntry, ConnectedUsers, Expected, Registry, Transport, Uid};
pub use reply::ReplyFn;
pub use router::{ErrorHandler, EventHandler, Router};
