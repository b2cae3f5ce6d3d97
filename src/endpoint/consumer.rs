//! Delivery consumers and their per-delivery context.

use std::sync::Arc;

use super::Endpoint;
use crate::error::{RabbitwireError, Result};
use crate::protocol::Payload;
use crate::transport::{BoxFuture, Connector};

/// Receives decoded deliveries from [`Endpoint::listen`].
///
/// Implemented by [`Router`](crate::Router) and by closures wrapped with
/// [`from_fn`].
pub trait Consumer: Send {
    /// Handle one decoded delivery.
    ///
    /// An `Err` is logged by the listen loop, which then keeps consuming.
    fn deliver<'a>(
        &'a mut self,
        ctx: &'a mut DeliveryContext,
        payload: Payload,
    ) -> BoxFuture<'a, Result<()>>;

    /// Called instead of `deliver` when a body could not be decoded.
    fn reject(&mut self, ctx: &mut DeliveryContext, error: RabbitwireError) {
        tracing::warn!(
            "Dropping undecodable delivery {} on '{}': {}",
            ctx.delivery_tag(),
            ctx.queue(),
            error
        );
    }
}

impl<C: Consumer + ?Sized> Consumer for Box<C> {
    fn deliver<'a>(
        &'a mut self,
        ctx: &'a mut DeliveryContext,
        payload: Payload,
    ) -> BoxFuture<'a, Result<()>> {
        (**self).deliver(ctx, payload)
    }

    fn reject(&mut self, ctx: &mut DeliveryContext, error: RabbitwireError) {
        (**self).reject(ctx, error)
    }
}

/// Consumer backed by a synchronous closure.
pub struct FnConsumer<F> {
    f: F,
}

/// Wrap a closure as a [`Consumer`].
///
/// # Example
///
/// ```ignore
/// let mut seen = Vec::new();
/// endpoint.listen_once(&mut from_fn(|_ctx, payload| {
///     seen.push(payload);
///     Ok(())
/// })).await?;
/// ```
pub fn from_fn<F>(f: F) -> FnConsumer<F>
where
    F: FnMut(&mut DeliveryContext, Payload) -> Result<()> + Send,
{
    FnConsumer { f }
}

impl<F> Consumer for FnConsumer<F>
where
    F: FnMut(&mut DeliveryContext, Payload) -> Result<()> + Send,
{
    fn deliver<'a>(
        &'a mut self,
        ctx: &'a mut DeliveryContext,
        payload: Payload,
    ) -> BoxFuture<'a, Result<()>> {
        let result = (self.f)(ctx, payload);
        Box::pin(std::future::ready(result))
    }
}

/// Per-delivery handle given to a [`Consumer`].
///
/// Lets the consumer stop the surrounding loop and open reply endpoints.
pub struct DeliveryContext {
    connector: Arc<dyn Connector>,
    queue: String,
    delivery_tag: u64,
    stop_requested: bool,
}

impl DeliveryContext {
    pub fn new(connector: Arc<dyn Connector>, queue: &str, delivery_tag: u64) -> Self {
        Self {
            connector,
            queue: queue.to_string(),
            delivery_tag,
            stop_requested: false,
        }
    }

    /// Queue the delivery came from.
    #[inline]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    #[inline]
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Issue the stop-consuming directive once this delivery is handled.
    pub fn stop_consuming(&mut self) {
        self.stop_requested = true;
    }

    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Open a reply-path endpoint bound to `queue` on a fresh connection.
    ///
    /// The caller owns the returned endpoint and must close it.
    pub async fn reply_to(&self, queue: &str) -> Result<Endpoint> {
        Endpoint::reply_path(self.connector.clone(), queue).await
    }
}
