//! Protocol module - JSON envelopes and reply-queue naming.
//!
//! # Wire Format
//!
//! ```text
//! Request: {"route": <string>, "data": <any>, "replyOnQueue": <string|null>}
//! Reply:   {"code": <integer>, "data": <any>}
//! ```
//!
//! A request that expects an answer names the queue the caller listens on.
//! That queue is derived deterministically by [`reply_queue_name`].

mod envelope;
mod naming;

pub use envelope::{codes, Payload, Reply, Request, Role};
pub use naming::reply_queue_name;
