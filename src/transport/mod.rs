//! Transport module - the broker collaborator contract.
//!
//! The core never speaks a broker wire protocol itself. A host supplies a
//! [`Connector`] that opens one exclusively owned [`Transport`] (a
//! connection+channel pair) per endpoint.
//!
//! - [`Transport`] - declare, publish, consume, stop, delete, close
//! - [`MemoryBroker`] - in-process broker implementing the contract
//!
//! # Waiting
//!
//! `next_delivery` waits until a message arrives or the consumer ends. The
//! core adds no timeout of its own: bounding that wait is the job of the
//! transport (heartbeat, read/write timeout), see
//! [`ConnectionConfig::wait_bound`](crate::ConnectionConfig::wait_bound).

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Result;

mod memory;

pub use memory::{MemoryBroker, MemoryConnector};

/// Boxed future returned by transport and handler methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The default (nameless, direct) exchange.
pub const DEFAULT_EXCHANGE: &str = "";

/// Queue declaration flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            auto_delete: false,
        }
    }
}

/// Identifies one active consumer on a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerTag(pub String);

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message handed to a consumer. Already acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue the message was consumed from.
    pub queue: String,
    /// Broker-assigned sequence number on this consumer.
    pub delivery_tag: u64,
    /// Raw body bytes.
    pub body: Bytes,
}

/// One broker connection and its channel.
///
/// Consumption is always immediate-ack: a delivery is acknowledged when it is
/// handed out, so a crash while processing it loses the message.
pub trait Transport: Send {
    /// Declare a queue. Declaring an existing queue is a no-op.
    fn declare_queue<'a>(
        &'a mut self,
        name: &'a str,
        options: QueueOptions,
    ) -> BoxFuture<'a, Result<()>>;

    /// Publish a body to `exchange` with `routing_key`.
    fn publish<'a>(
        &'a mut self,
        exchange: &'a str,
        routing_key: &'a str,
        body: Bytes,
    ) -> BoxFuture<'a, Result<()>>;

    /// Start consuming from a queue.
    fn consume<'a>(&'a mut self, queue: &'a str) -> BoxFuture<'a, Result<ConsumerTag>>;

    /// Wait for the next delivery. `None` means the consumer ended.
    fn next_delivery<'a>(
        &'a mut self,
        tag: &'a ConsumerTag,
    ) -> BoxFuture<'a, Result<Option<Delivery>>>;

    /// Stop a consumer. Unknown tags are ignored.
    fn stop_consuming<'a>(&'a mut self, tag: &'a ConsumerTag) -> BoxFuture<'a, Result<()>>;

    /// Delete a queue. With `if_empty`, a queue holding messages is kept and
    /// an error is returned. Deleting an unknown queue is a no-op.
    fn delete_queue<'a>(&'a mut self, name: &'a str, if_empty: bool) -> BoxFuture<'a, Result<()>>;

    /// Close the channel, then the connection.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Opens transports. Each call yields a new, independently owned connection.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Transport>>>;
}
