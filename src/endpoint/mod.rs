//! Endpoint - one owned connection bound to one queue.
//!
//! An [`Endpoint`] sends routed requests (optionally waiting for a correlated
//! reply) and runs listen loops that hand decoded deliveries to a
//! [`Consumer`].
//!
//! # Example
//!
//! ```ignore
//! use rabbitwire::Endpoint;
//!
//! let reply = Endpoint::scoped(connector, |ep| Box::pin(async move {
//!     ep.queue("billing").await?
//!         .with(&serde_json::json!({"invoice": 7}))?
//!         .call("charge", "-7")
//!         .await
//! }))
//! .await?;
//! ```
//!
//! # Blocking
//!
//! `listen`, `listen_once` and a reply-awaiting `send` do not return until a
//! delivery arrives or the transport reports an error. There is no timeout
//! here; configure heartbeat and read/write timeout on the transport.
//!
//! # Concurrency
//!
//! An endpoint is driven by one task at a time (`&mut self` everywhere). Two
//! overlapping calls on the same queue and route must pass distinct ids, or
//! both wait on the same reply queue, see
//! [`reply_queue_name`](crate::protocol::reply_queue_name).

mod capture;
mod consumer;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::codec::JsonCodec;
use crate::error::{RabbitwireError, Result};
use crate::protocol::{reply_queue_name, Payload, Reply, Request, Role};
use crate::transport::{BoxFuture, Connector, QueueOptions, Transport, DEFAULT_EXCHANGE};

use capture::ReplyCapture;
pub use capture::ReplyCallback;
pub use consumer::{from_fn, Consumer, DeliveryContext, FnConsumer};

/// A queue-bound sender/listener owning one transport connection.
pub struct Endpoint {
    connector: Arc<dyn Connector>,
    transport: Box<dyn Transport>,
    role: Role,
    queue: Option<String>,
    /// JSON set by `with`, taken by the next `send`.
    pending: Option<Value>,
    capture: Option<ReplyCapture>,
    closed: bool,
}

impl Endpoint {
    /// Open a request-path endpoint on a new connection.
    pub async fn connect(connector: Arc<dyn Connector>) -> Result<Self> {
        Self::open(connector, Role::Request).await
    }

    /// Open a reply-path endpoint bound to `queue`.
    ///
    /// Reply-path endpoints publish their payload bare, as a reply envelope,
    /// and decode deliveries as replies.
    pub async fn reply_path(connector: Arc<dyn Connector>, queue: &str) -> Result<Self> {
        let mut endpoint = Self::open(connector, Role::Reply).await?;
        if let Err(e) = endpoint.queue(queue).await {
            let _ = endpoint.close().await;
            return Err(e);
        }
        Ok(endpoint)
    }

    async fn open(connector: Arc<dyn Connector>, role: Role) -> Result<Self> {
        let transport = connector.connect().await?;
        Ok(Self {
            connector,
            transport,
            role,
            queue: None,
            pending: None,
            capture: None,
            closed: false,
        })
    }

    /// Run `f` with a fresh endpoint and close it on every exit path.
    ///
    /// An error from `f` wins over an error from closing.
    pub async fn scoped<T, F>(connector: Arc<dyn Connector>, f: F) -> Result<T>
    where
        T: 'static,
        F: for<'e> FnOnce(&'e mut Endpoint) -> BoxFuture<'e, Result<T>>,
    {
        let mut endpoint = Self::connect(connector).await?;
        let result = f(&mut endpoint).await;
        let closed = endpoint.close().await;

        let value = result?;
        closed?;
        Ok(value)
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The bound queue, if any.
    #[inline]
    pub fn queue_name(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the next `send` will wait for a reply.
    #[inline]
    pub fn expects_reply(&self) -> bool {
        self.capture.is_some()
    }

    /// Declare `name` (durable, not auto-deleted) and bind this endpoint to it.
    ///
    /// Repeating the call with the same name re-declares, which the broker
    /// treats as a no-op. Binding to a different name is rejected.
    pub async fn queue(&mut self, name: &str) -> Result<&mut Self> {
        self.ensure_open()?;

        if let Some(bound) = &self.queue {
            if bound != name {
                return Err(RabbitwireError::Protocol(format!(
                    "endpoint already bound to '{}', cannot rebind to '{}'",
                    bound, name
                )));
            }
        }

        self.transport
            .declare_queue(name, QueueOptions::default())
            .await?;
        self.queue = Some(name.to_string());
        Ok(self)
    }

    /// Set the payload of the next `send`.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `data` is not representable as JSON.
    pub fn with<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<&mut Self> {
        self.ensure_open()?;
        self.pending = Some(JsonCodec::to_value(data)?);
        Ok(self)
    }

    /// Make the next `send` wait for a correlated reply and pass it to `callback`.
    ///
    /// Nothing is opened until `send`. The capture is used for that single
    /// send and then discarded.
    pub fn catch_reply<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        self.capture = Some(ReplyCapture::new(Box::new(callback)));
        self
    }

    /// Publish the pending payload to the bound queue.
    ///
    /// On a request-path endpoint the payload is wrapped in a [`Request`]
    /// for `route`. If `catch_reply` was called, this waits on
    /// `{queue}_{route}{id}` for one reply before returning; concurrent
    /// calls sharing queue and route need distinct `id`s.
    ///
    /// On a reply-path endpoint the payload is published as is and `route`
    /// and `id` are ignored.
    pub async fn send(&mut self, route: &str, id: &str) -> Result<()> {
        self.ensure_open()?;

        let queue = self
            .queue
            .clone()
            .ok_or_else(|| RabbitwireError::Protocol("Queue not defined.".into()))?;

        // Payload and capture stay in place if the send is refused.
        match self.role {
            Role::Request if route.is_empty() => {
                return Err(RabbitwireError::Protocol("route must not be empty".into()));
            }
            Role::Reply if self.capture.is_some() => {
                return Err(RabbitwireError::Protocol(
                    "reply-path endpoints cannot wait for replies".into(),
                ));
            }
            _ => {}
        }

        let mut capture = self.capture.take();
        let reply_queue = capture
            .as_ref()
            .map(|_| reply_queue_name(&queue, route, id));

        let data = self.pending.take().unwrap_or(Value::Null);
        let body = match self.role {
            Role::Request => JsonCodec::encode(&Request {
                route: route.to_string(),
                data,
                reply_on_queue: reply_queue.clone(),
            })?,
            Role::Reply => JsonCodec::encode(&data)?,
        };

        if let (Some(capture), Some(reply_queue)) = (capture.as_mut(), reply_queue.as_deref()) {
            capture.bind(&self.connector, reply_queue).await?;
        }

        if let Err(e) = self
            .transport
            .publish(DEFAULT_EXCHANGE, &queue, body)
            .await
        {
            if let Some(capture) = capture {
                capture.abandon().await;
            }
            return Err(e);
        }

        tracing::debug!(
            "Published '{}' to '{}'{}",
            route,
            queue,
            if capture.is_some() { ", awaiting reply" } else { "" }
        );

        match capture {
            Some(capture) => capture.wait(&self.connector).await,
            None => Ok(()),
        }
    }

    /// Send `route` and return the correlated reply.
    ///
    /// Shorthand for `catch_reply` + `send` that hands the reply back
    /// instead of to a callback.
    pub async fn call(&mut self, route: &str, id: &str) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.catch_reply(move |reply| {
            let _ = tx.send(reply);
        });
        self.send(route, id).await?;

        let queue = self.queue.as_deref().unwrap_or_default();
        rx.await
            .map_err(|_| RabbitwireError::ConsumerCancelled(reply_queue_name(queue, route, id)))
    }

    /// Consume the bound queue until the consumer asks to stop or the
    /// transport ends the consumer.
    ///
    /// Deliveries are acknowledged as they are received. Consumer errors are
    /// logged and do not stop the loop.
    pub async fn listen<C: Consumer + ?Sized>(&mut self, consumer: &mut C) -> Result<()> {
        self.run(consumer, false).await
    }

    /// Consume exactly one delivery, then stop consuming.
    ///
    /// # Errors
    ///
    /// Returns [`RabbitwireError::ConsumerCancelled`] if the consumer ends
    /// before anything is delivered, [`RabbitwireError::DeliveryDecode`] if
    /// the delivery is malformed, and the consumer's own error if it fails.
    pub async fn listen_once<C: Consumer + ?Sized>(&mut self, consumer: &mut C) -> Result<()> {
        self.run(consumer, true).await
    }

    async fn run<C: Consumer + ?Sized>(&mut self, consumer: &mut C, once: bool) -> Result<()> {
        self.ensure_open()?;

        let queue = self.queue.as_deref().ok_or_else(|| {
            RabbitwireError::Protocol("Queue not defined.".into())
        })?;

        consume_loop(
            self.transport.as_mut(),
            &self.connector,
            queue,
            self.role,
            consumer,
            once,
        )
        .await
    }

    /// Close the channel and connection. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.capture = None;
        self.pending = None;

        tracing::debug!("Closing endpoint on {:?}", self.queue);
        self.transport.close().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RabbitwireError::Closed);
        }
        Ok(())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("queue", &self.queue)
            .field("expects_reply", &self.capture.is_some())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if !self.closed {
            // The transport releases its connection on drop.
            tracing::warn!("Endpoint on {:?} dropped without close()", self.queue);
        }
    }
}

/// Consume `queue`, decoding each body per `role` and feeding `consumer`.
///
/// With `once`, returns after the first decoded delivery.
pub(crate) async fn consume_loop<C: Consumer + ?Sized>(
    transport: &mut dyn Transport,
    connector: &Arc<dyn Connector>,
    queue: &str,
    role: Role,
    consumer: &mut C,
    once: bool,
) -> Result<()> {
    let tag = transport.consume(queue).await?;
    tracing::debug!("Consuming '{}' as {}", queue, tag);

    loop {
        let Some(delivery) = transport.next_delivery(&tag).await? else {
            if once {
                return Err(RabbitwireError::ConsumerCancelled(queue.to_string()));
            }
            tracing::debug!("Consumer {} on '{}' ended", tag, queue);
            return Ok(());
        };

        let mut ctx = DeliveryContext::new(connector.clone(), queue, delivery.delivery_tag);

        let payload = match Payload::decode(role, queue, &delivery.body) {
            Ok(payload) => payload,
            Err(e) if once => {
                transport.stop_consuming(&tag).await?;
                return Err(e);
            }
            Err(e) => {
                consumer.reject(&mut ctx, e);
                if ctx.stop_requested() {
                    transport.stop_consuming(&tag).await?;
                    return Ok(());
                }
                continue;
            }
        };

        let outcome = consumer.deliver(&mut ctx, payload).await;

        if once {
            transport.stop_consuming(&tag).await?;
            return outcome;
        }

        if let Err(e) = outcome {
            tracing::error!(
                "Consumer failed on delivery {} from '{}': {}",
                delivery.delivery_tag,
                queue,
                e
            );
        }

        if ctx.stop_requested() {
            tracing::debug!("Stop requested on '{}'", queue);
            transport.stop_consuming(&tag).await?;
            return Ok(());
        }
    }
}
