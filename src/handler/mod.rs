//! Handler module - route handlers and the table that holds them.
//!
//! Provides:
//! - [`Handler`] - the single capability a route resolves to
//! - [`FnHandler`] - a closure returning a future
//! - [`Service`] - a type instantiated fresh for every call
//! - [`RouteTable`] - maps route keys to handlers
//!
//! # Example
//!
//! ```ignore
//! use rabbitwire::handler::{HandlerError, RouteTable};
//!
//! let mut table = RouteTable::new();
//!
//! table.register("ping", |_req| async { Ok::<_, HandlerError>("pong") });
//! table.register_service::<Billing>("charge");
//! table.register_method("refund", Billing::refund);
//! ```

mod registry;
mod service;

pub use registry::{FnHandler, Handler, HandlerResult, RouteTable};
pub use service::Service;

pub use crate::error::HandlerError;
