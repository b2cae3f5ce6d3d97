//! Reply capture: the one-shot listener behind `catch_reply`.
//!
//! A capture owns its own connection, distinct from the endpoint that sent
//! the request. Its lifecycle is:
//!
//! 1. `catch_reply` stores the callback (no connection yet)
//! 2. `send` binds it: connect, declare the reply queue
//! 3. the request is published
//! 4. `wait` consumes exactly one reply, runs the callback, deletes the
//!    queue (if empty) and closes the connection
//!
//! The reply queue is declared before the request goes out so that a fast
//! responder cannot publish into a queue that does not exist yet.

use std::sync::Arc;

use super::{consume_loop, from_fn};
use crate::error::{RabbitwireError, Result};
use crate::protocol::{Payload, Reply, Role};
use crate::transport::{Connector, QueueOptions, Transport};

/// Callback receiving the correlated reply.
pub type ReplyCallback = Box<dyn FnOnce(Reply) + Send>;

struct Bound {
    transport: Box<dyn Transport>,
    queue: String,
}

pub(crate) struct ReplyCapture {
    callback: ReplyCallback,
    bound: Option<Bound>,
}

impl ReplyCapture {
    pub(crate) fn new(callback: ReplyCallback) -> Self {
        Self {
            callback,
            bound: None,
        }
    }

    /// Open the capture connection and declare the reply queue.
    pub(crate) async fn bind(&mut self, connector: &Arc<dyn Connector>, queue: &str) -> Result<()> {
        let mut transport = connector.connect().await?;
        if let Err(e) = transport.declare_queue(queue, QueueOptions::default()).await {
            let _ = transport.close().await;
            return Err(e);
        }

        tracing::debug!("Reply capture bound to '{}'", queue);
        self.bound = Some(Bound {
            transport,
            queue: queue.to_string(),
        });
        Ok(())
    }

    /// Wait for exactly one reply, hand it to the callback, then clean up.
    pub(crate) async fn wait(self, connector: &Arc<dyn Connector>) -> Result<()> {
        let Some(mut bound) = self.bound else {
            return Err(RabbitwireError::Protocol(
                "reply capture was never bound to a queue".into(),
            ));
        };

        let queue = bound.queue.clone();
        let mut received = None;
        let outcome = consume_loop(
            bound.transport.as_mut(),
            connector,
            &queue,
            Role::Reply,
            &mut from_fn(|_ctx, payload| {
                if let Payload::Reply(reply) = payload {
                    received = Some(reply);
                }
                Ok(())
            }),
            true,
        )
        .await;

        Self::release(bound).await;
        outcome?;

        match received {
            Some(reply) => {
                (self.callback)(reply);
                Ok(())
            }
            None => Err(RabbitwireError::ConsumerCancelled(queue)),
        }
    }

    /// Tear down without waiting, used when the request never went out.
    pub(crate) async fn abandon(self) {
        if let Some(bound) = self.bound {
            Self::release(bound).await;
        }
    }

    /// Best-effort queue deletion followed by close.
    ///
    /// Deletion is advisory: the queue may be non-empty (a late duplicate
    /// arrived) or already gone, and neither is an error.
    async fn release(mut bound: Bound) {
        if let Err(e) = bound.transport.delete_queue(&bound.queue, true).await {
            tracing::debug!("Reply queue '{}' not deleted: {}", bound.queue, e);
        }
        if let Err(e) = bound.transport.close().await {
            tracing::debug!("Reply capture close failed: {}", e);
        }
    }
}
