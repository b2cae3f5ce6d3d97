//! # rabbitwire
//!
//! Request/reply RPC over a message-queue transport.
//!
//! Callers publish a routed [`Request`] onto a named queue and may wait for
//! a correlated [`Reply`] on a reply queue named `{queue}_{route}{id}`.
//! Receivers listen on a queue and hand each request to a [`Router`], which
//! runs the handler registered for the route and publishes the reply.
//!
//! ## Architecture
//!
//! - **Transport** ([`Transport`], [`Connector`]): broker primitives supplied by the host
//! - **Protocol** ([`protocol`]): JSON request/reply envelopes
//! - **Endpoint** ([`Endpoint`]): one owned connection bound to one queue
//! - **Router** ([`Router`]): route → handler dispatch with isolated failures
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rabbitwire::{ConnectionConfig, Endpoint, HandlerError, MemoryBroker, Router};
//!
//! #[tokio::main]
//! async fn main() -> rabbitwire::Result<()> {
//!     let broker = MemoryBroker::new();
//!     let connector = Arc::new(broker.connector(ConnectionConfig::default())?);
//!
//!     let mut server = Endpoint::connect(connector.clone()).await?;
//!     server.queue("rpc").await?;
//!     let mut router = Router::new()
//!         .route("ping", |_req| async { Ok::<_, HandlerError>("pong") });
//!
//!     let mut client = Endpoint::connect(connector).await?;
//!     client.queue("rpc").await?;
//!
//!     let (served, reply) = tokio::join!(
//!         server.listen_once(&mut router),
//!         client.call("ping", ""),
//!     );
//!     served?;
//!     assert_eq!(reply?.data, "pong");
//!
//!     server.close().await?;
//!     client.close().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod router;
pub mod transport;

pub use config::{ConnectionConfig, ConnectionOptions};
pub use endpoint::{from_fn, Consumer, DeliveryContext, Endpoint};
pub use error::{HandlerError, RabbitwireError, Result};
pub use handler::{Handler, RouteTable, Service};
pub use protocol::{codes, reply_queue_name, Payload, Reply, Request, Role};
pub use router::{Outcome, Router};
pub use transport::{Connector, MemoryBroker, Transport};
