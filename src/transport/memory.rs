//! In-process broker.
//!
//! Routes through the default exchange only, which is all the RPC protocol
//! uses. Messages published to a queue nobody declared are dropped, as a
//! real broker does for unroutable messages without `mandatory`.
//!
//! # Example
//!
//! ```
//! use rabbitwire::{ConnectionConfig, MemoryBroker};
//!
//! let broker = MemoryBroker::new();
//! let connector = broker.connector(ConnectionConfig::default()).unwrap();
//! # let _ = connector;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{
    BoxFuture, ConsumerTag, Connector, Delivery, QueueOptions, Transport, DEFAULT_EXCHANGE,
};
use crate::config::ConnectionConfig;
use crate::error::{RabbitwireError, Result};

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>>;

/// A declared queue.
struct QueueSlot {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: SharedReceiver,
    /// Messages published but not yet delivered.
    depth: Arc<AtomicUsize>,
    options: QueueOptions,
}

#[derive(Default)]
struct BrokerInner {
    queues: HashMap<String, QueueSlot>,
    /// Every body published, keyed by routing key, routed or not.
    history: HashMap<String, Vec<Bytes>>,
    /// Declare calls per queue name.
    declares: HashMap<String, usize>,
}

struct BrokerState {
    vhost: String,
    inner: Mutex<BrokerInner>,
    open_connections: AtomicUsize,
    next_consumer: AtomicU64,
}

impl BrokerState {
    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        // A panic while holding the lock leaves plain data behind.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared in-memory broker. Cheap to clone.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Broker serving the default vhost `/`.
    pub fn new() -> Self {
        Self::with_vhost("/")
    }

    pub fn with_vhost(vhost: impl Into<String>) -> Self {
        Self {
            state: Arc::new(BrokerState {
                vhost: vhost.into(),
                inner: Mutex::new(BrokerInner::default()),
                open_connections: AtomicUsize::new(0),
                next_consumer: AtomicU64::new(1),
            }),
        }
    }

    /// Create a connector for this broker.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn connector(&self, config: ConnectionConfig) -> Result<MemoryConnector> {
        config.validate()?;
        Ok(MemoryConnector {
            broker: self.clone(),
            config,
        })
    }

    /// Whether a queue currently exists.
    pub fn has_queue(&self, name: &str) -> bool {
        self.state.lock().queues.contains_key(name)
    }

    /// Names of all existing queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Messages waiting in a queue (0 for unknown queues).
    pub fn queue_depth(&self, name: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(name)
            .map(|q| q.depth.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Flags a queue was declared with.
    pub fn queue_options(&self, name: &str) -> Option<QueueOptions> {
        self.state.lock().queues.get(name).map(|q| q.options)
    }

    /// Every body ever published with `routing_key`, in publish order.
    pub fn published(&self, routing_key: &str) -> Vec<Bytes> {
        self.state
            .lock()
            .history
            .get(routing_key)
            .cloned()
            .unwrap_or_default()
    }

    /// How many times `name` was declared.
    pub fn declare_count(&self, name: &str) -> usize {
        self.state.lock().declares.get(name).copied().unwrap_or(0)
    }

    /// Connections opened and not yet closed or dropped.
    pub fn open_connections(&self) -> usize {
        self.state.open_connections.load(Ordering::Acquire)
    }

    fn open(&self) -> MemoryTransport {
        self.state.open_connections.fetch_add(1, Ordering::AcqRel);
        MemoryTransport {
            state: self.state.clone(),
            consumers: HashMap::new(),
            closed: false,
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Connector bound to a [`MemoryBroker`] and a configuration.
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
    config: ConnectionConfig,
}

impl MemoryConnector {
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Transport>>> {
        Box::pin(async move {
            if self.config.options.vhost != self.broker.state.vhost {
                return Err(RabbitwireError::Transport(format!(
                    "access refused to vhost '{}'",
                    self.config.options.vhost
                )));
            }

            tracing::debug!(
                "Opening in-memory connection to {}:{} (vhost '{}')",
                self.config.host,
                self.config.port,
                self.config.options.vhost
            );
            let transport: Box<dyn Transport> = Box::new(self.broker.open());
            Ok(transport)
        })
    }
}

struct ConsumerSlot {
    queue: String,
    rx: SharedReceiver,
    depth: Arc<AtomicUsize>,
    delivered: u64,
}

/// One connection+channel on a [`MemoryBroker`].
struct MemoryTransport {
    state: Arc<BrokerState>,
    consumers: HashMap<ConsumerTag, ConsumerSlot>,
    closed: bool,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(RabbitwireError::Transport("connection closed".into()));
        }
        Ok(())
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.consumers.clear();
            self.state.open_connections.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Transport for MemoryTransport {
    fn declare_queue<'a>(
        &'a mut self,
        name: &'a str,
        options: QueueOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.ensure_open()?;

            let mut inner = self.state.lock();
            *inner.declares.entry(name.to_string()).or_insert(0) += 1;
            inner.queues.entry(name.to_string()).or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                QueueSlot {
                    tx,
                    rx: Arc::new(tokio::sync::Mutex::new(rx)),
                    depth: Arc::new(AtomicUsize::new(0)),
                    options,
                }
            });
            Ok(())
        })
    }

    fn publish<'a>(
        &'a mut self,
        exchange: &'a str,
        routing_key: &'a str,
        body: Bytes,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.ensure_open()?;

            if exchange != DEFAULT_EXCHANGE {
                return Err(RabbitwireError::Transport(format!(
                    "no exchange '{}' in vhost '{}'",
                    exchange, self.state.vhost
                )));
            }

            let mut inner = self.state.lock();
            inner
                .history
                .entry(routing_key.to_string())
                .or_default()
                .push(body.clone());

            match inner.queues.get(routing_key) {
                Some(queue) => {
                    queue.depth.fetch_add(1, Ordering::AcqRel);
                    if queue.tx.send(body).is_err() {
                        queue.depth.fetch_sub(1, Ordering::AcqRel);
                    }
                }
                None => {
                    tracing::debug!("Dropping unroutable message for '{}'", routing_key);
                }
            }
            Ok(())
        })
    }

    fn consume<'a>(&'a mut self, queue: &'a str) -> BoxFuture<'a, Result<ConsumerTag>> {
        Box::pin(async move {
            self.ensure_open()?;

            let (rx, depth) = {
                let inner = self.state.lock();
                let slot = inner.queues.get(queue).ok_or_else(|| {
                    RabbitwireError::Transport(format!("no queue '{}' to consume from", queue))
                })?;
                (slot.rx.clone(), slot.depth.clone())
            };

            let id = self.state.next_consumer.fetch_add(1, Ordering::AcqRel);
            let tag = ConsumerTag(format!("memory-ctag-{}", id));
            self.consumers.insert(
                tag.clone(),
                ConsumerSlot {
                    queue: queue.to_string(),
                    rx,
                    depth,
                    delivered: 0,
                },
            );
            Ok(tag)
        })
    }

    fn next_delivery<'a>(
        &'a mut self,
        tag: &'a ConsumerTag,
    ) -> BoxFuture<'a, Result<Option<Delivery>>> {
        Box::pin(async move {
            self.ensure_open()?;

            let Some(slot) = self.consumers.get_mut(tag) else {
                return Ok(None);
            };

            let body = {
                let mut rx = slot.rx.lock().await;
                rx.recv().await
            };

            match body {
                Some(body) => {
                    slot.depth.fetch_sub(1, Ordering::AcqRel);
                    slot.delivered += 1;
                    Ok(Some(Delivery {
                        queue: slot.queue.clone(),
                        delivery_tag: slot.delivered,
                        body,
                    }))
                }
                // Queue deleted and drained.
                None => Ok(None),
            }
        })
    }

    fn stop_consuming<'a>(&'a mut self, tag: &'a ConsumerTag) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.consumers.remove(tag);
            Ok(())
        })
    }

    fn delete_queue<'a>(&'a mut self, name: &'a str, if_empty: bool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.ensure_open()?;

            let mut inner = self.state.lock();
            let depth = match inner.queues.get(name) {
                Some(queue) => queue.depth.load(Ordering::Acquire),
                None => return Ok(()),
            };

            if if_empty && depth > 0 {
                return Err(RabbitwireError::Transport(format!(
                    "queue '{}' not empty ({} messages)",
                    name, depth
                )));
            }

            inner.queues.remove(name);
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.release();
            Ok(())
        })
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(broker: &MemoryBroker) -> Box<dyn Transport> {
        broker
            .connector(ConnectionConfig::default())
            .unwrap()
            .connect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_consume() {
        let broker = MemoryBroker::new();
        let mut t = connect(&broker).await;

        t.declare_queue("jobs", QueueOptions::default()).await.unwrap();
        t.publish("", "jobs", Bytes::from_static(b"one")).await.unwrap();
        t.publish("", "jobs", Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(broker.queue_depth("jobs"), 2);

        let tag = t.consume("jobs").await.unwrap();
        let first = t.next_delivery(&tag).await.unwrap().unwrap();
        let second = t.next_delivery(&tag).await.unwrap().unwrap();

        assert_eq!(&first.body[..], b"one");
        assert_eq!(first.delivery_tag, 1);
        assert_eq!(&second.body[..], b"two");
        assert_eq!(broker.queue_depth("jobs"), 0);
    }

    #[tokio::test]
    async fn test_unroutable_message_dropped_but_recorded() {
        let broker = MemoryBroker::new();
        let mut t = connect(&broker).await;

        t.publish("", "nowhere", Bytes::from_static(b"x")).await.unwrap();

        assert!(!broker.has_queue("nowhere"));
        assert_eq!(broker.published("nowhere").len(), 1);
    }

    #[tokio::test]
    async fn test_named_exchange_rejected() {
        let broker = MemoryBroker::new();
        let mut t = connect(&broker).await;

        let err = t.publish("amq.topic", "q", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, RabbitwireError::Transport(_)));
    }

    #[tokio::test]
    async fn test_redeclare_is_noop() {
        let broker = MemoryBroker::new();
        let mut t = connect(&broker).await;

        t.declare_queue("q", QueueOptions::default()).await.unwrap();
        t.publish("", "q", Bytes::from_static(b"kept")).await.unwrap();
        t.declare_queue("q", QueueOptions::default()).await.unwrap();

        assert_eq!(broker.queue_depth("q"), 1);
        assert_eq!(broker.declare_count("q"), 2);
        assert_eq!(broker.queue_options("q"), Some(QueueOptions::default()));
    }

    #[tokio::test]
    async fn test_delete_if_empty() {
        let broker = MemoryBroker::new();
        let mut t = connect(&broker).await;

        t.declare_queue("q", QueueOptions::default()).await.unwrap();
        t.publish("", "q", Bytes::from_static(b"x")).await.unwrap();
        assert!(t.delete_queue("q", true).await.is_err());
        assert!(broker.has_queue("q"));

        t.delete_queue("q", false).await.unwrap();
        assert!(!broker.has_queue("q"));

        // Unknown queue
        t.delete_queue("q", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_consumer_ends_when_queue_deleted() {
        let broker = MemoryBroker::new();
        let mut consumer = connect(&broker).await;
        let mut admin = connect(&broker).await;

        consumer.declare_queue("q", QueueOptions::default()).await.unwrap();
        let tag = consumer.consume("q").await.unwrap();
        admin.delete_queue("q", true).await.unwrap();

        assert!(consumer.next_delivery(&tag).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stopped_consumer_yields_none() {
        let broker = MemoryBroker::new();
        let mut t = connect(&broker).await;

        t.declare_queue("q", QueueOptions::default()).await.unwrap();
        let tag = t.consume("q").await.unwrap();
        t.stop_consuming(&tag).await.unwrap();

        assert!(t.next_delivery(&tag).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_and_drop_release_connection() {
        let broker = MemoryBroker::new();
        let mut a = connect(&broker).await;
        let b = connect(&broker).await;
        assert_eq!(broker.open_connections(), 2);

        a.close().await.unwrap();
        a.close().await.unwrap();
        assert_eq!(broker.open_connections(), 1);
        assert!(a.declare_queue("q", QueueOptions::default()).await.is_err());

        drop(b);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_wrong_vhost_refused() {
        let broker = MemoryBroker::with_vhost("billing");
        let connector = broker.connector(ConnectionConfig::default()).unwrap();

        assert!(connector.connect().await.is_err());
    }
}
