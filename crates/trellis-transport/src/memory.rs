//! In-memory fabric shared by any number of simulated host instances.
//!
//! ```text
//!                    ┌──────────────────── MemoryFabric ────────────────────┐
//! MemoryTransport ──▶│ topic "catalog.entity.changed"                       │
//!   (instance a)     │ ├── fan-out:   sub-1 ─▶ a    sub-4 ─▶ b              │
//! MemoryTransport ──▶│ └── work queue: [p1, p2, …]  ◀── a, b compete        │
//!   (instance b)     └──────────────────────────────────────────────────────┘
//! ```
//!
//! Each broadcast subscription owns an unbounded channel, so every payload is
//! copied to every one of them.  Each topic owns a single retention queue for
//! its work-queue group; consumers pop from it, so a payload leaves the queue
//! exactly once.  When the queue is full the oldest payload is dropped.  A
//! payload is only retained while the topic has a work-queue consumer or no
//! subscriber at all.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trellis_core::{
    DeliveryMode, Payload, Transport, TransportError, TransportResult, TransportSubscription,
    TransportSubscriptionId,
};

/// Default number of payloads a work queue retains while nobody consumes.
pub const DEFAULT_RETENTION_LIMIT: usize = 1024;

// ─── Work queue ───────────────────────────────────────────────────────────────

struct WorkQueue {
    pending: Mutex<VecDeque<Payload>>,
    notify: Notify,
    limit: usize,
}

impl WorkQueue {
    fn new(limit: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            limit: limit.max(1),
        }
    }

    /// Appends a payload, returning `true` if the oldest one had to be dropped.
    fn push(&self, payload: Payload) -> bool {
        let dropped = {
            let mut pending = self.pending.lock();
            let dropped = pending.len() >= self.limit && pending.pop_front().is_some();
            pending.push_back(payload);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    async fn pop(&self, token: &CancellationToken) -> Option<Payload> {
        loop {
            if token.is_cancelled() {
                self.hand_over();
                return None;
            }
            if let Some(payload) = self.pending.lock().pop_front() {
                return Some(payload);
            }
            tokio::select! {
                () = self.notify.notified() => {}
                () = token.cancelled() => {
                    self.hand_over();
                    return None;
                }
            }
        }
    }

    /// Passes a possibly consumed wake-up on to the next consumer.
    fn hand_over(&self) {
        if !self.pending.lock().is_empty() {
            self.notify.notify_one();
        }
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

// ─── Fabric state ─────────────────────────────────────────────────────────────

struct Topic {
    fanout: HashMap<TransportSubscriptionId, mpsc::UnboundedSender<Payload>>,
    queue: Arc<WorkQueue>,
    consumers: usize,
}

impl Topic {
    fn new(limit: usize) -> Self {
        Self {
            fanout: HashMap::new(),
            queue: Arc::new(WorkQueue::new(limit)),
            consumers: 0,
        }
    }
}

enum RouteKind {
    Broadcast,
    WorkQueue(CancellationToken),
}

struct Route {
    topic: String,
    connection: u64,
    kind: RouteKind,
}

#[derive(Default)]
struct FabricState {
    topics: HashMap<String, Topic>,
    routes: HashMap<TransportSubscriptionId, Route>,
}

// =============================================================================
// MemoryFabric
// =============================================================================

/// The shared "broker" behind every [`MemoryTransport`] connected to it.
pub struct MemoryFabric {
    state: Mutex<FabricState>,
    retention_limit: usize,
    next_subscription: AtomicU64,
    next_connection: AtomicU64,
}

impl MemoryFabric {
    /// Creates a fabric with the default retention limit.
    pub fn new() -> Arc<Self> {
        Self::with_retention_limit(DEFAULT_RETENTION_LIMIT)
    }

    /// Creates a fabric that retains at most `limit` payloads per work queue.
    pub fn with_retention_limit(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FabricState::default()),
            retention_limit: limit.max(1),
            next_subscription: AtomicU64::new(1),
            next_connection: AtomicU64::new(1),
        })
    }

    /// Creates a new, not yet opened connection for one host instance.
    pub fn connection(self: &Arc<Self>, instance: impl Into<String>) -> MemoryTransport {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        MemoryTransport {
            name: format!("memory:{}", instance.into()),
            fabric: Arc::clone(self),
            connection: id,
            status: Mutex::new(ConnectionStatus::Idle),
            subscriptions: Mutex::new(HashSet::new()),
        }
    }

    /// Payloads waiting in the work queue of `topic`.
    pub fn retained(&self, topic: &str) -> usize {
        self.state
            .lock()
            .topics
            .get(topic)
            .map_or(0, |t| t.queue.len())
    }

    /// Number of live subscriptions (both modes) on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .topics
            .get(topic)
            .map_or(0, |t| t.fanout.len() + t.consumers)
    }

    fn publish(&self, topic: &str, payload: Payload) {
        let mut state = self.state.lock();
        let limit = self.retention_limit;
        let entry = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(limit));

        // Receivers that went away without unsubscribing are pruned here.
        entry
            .fanout
            .retain(|_, tx| tx.send(payload.clone()).is_ok());

        // A topic with only broadcast listeners keeps no history for late consumers.
        if entry.consumers == 0 && !entry.fanout.is_empty() {
            return;
        }
        if entry.queue.push(payload) {
            warn!(
                topic,
                limit, "Work queue retention limit reached, dropped oldest payload"
            );
        }
    }

    fn subscribe(
        &self,
        topic: &str,
        mode: DeliveryMode,
        connection: u64,
    ) -> TransportSubscription {
        let id = TransportSubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock();
        let limit = self.retention_limit;
        let entry = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(limit));

        let (deliveries, kind) = match mode {
            DeliveryMode::Broadcast => {
                let (tx, rx) = mpsc::unbounded_channel();
                entry.fanout.insert(id, tx);
                let stream = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|payload| (payload, rx))
                })
                .boxed();
                (stream, RouteKind::Broadcast)
            }
            DeliveryMode::WorkQueue => {
                entry.consumers += 1;
                let token = CancellationToken::new();
                let queue = Arc::clone(&entry.queue);
                let stream =
                    futures::stream::unfold((queue, token.clone()), |(queue, token)| async move {
                        let payload = queue.pop(&token).await?;
                        Some((payload, (queue, token)))
                    })
                    .boxed();
                (stream, RouteKind::WorkQueue(token))
            }
        };

        state.routes.insert(
            id,
            Route {
                topic: topic.to_string(),
                connection,
                kind,
            },
        );
        debug!(topic, %id, %mode, "Subscription added to memory fabric");

        TransportSubscription { id, deliveries }
    }

    fn unsubscribe(&self, id: TransportSubscriptionId, connection: u64) {
        let mut state = self.state.lock();
        let owned = state
            .routes
            .get(&id)
            .is_some_and(|route| route.connection == connection);
        if !owned {
            return;
        }
        let Some(route) = state.routes.remove(&id) else {
            return;
        };
        if let Some(topic) = state.topics.get_mut(&route.topic) {
            match route.kind {
                RouteKind::Broadcast => {
                    topic.fanout.remove(&id);
                }
                RouteKind::WorkQueue(token) => {
                    topic.consumers = topic.consumers.saturating_sub(1);
                    token.cancel();
                }
            }
        }
        debug!(topic = %route.topic, %id, "Subscription removed from memory fabric");
    }
}

// =============================================================================
// MemoryTransport
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionStatus {
    Idle,
    Open,
    Closed,
}

/// One instance's connection to a [`MemoryFabric`].
pub struct MemoryTransport {
    name: String,
    fabric: Arc<MemoryFabric>,
    connection: u64,
    status: Mutex<ConnectionStatus>,
    subscriptions: Mutex<HashSet<TransportSubscriptionId>>,
}

impl MemoryTransport {
    /// Creates a connection to a private fabric (single-process use).
    pub fn standalone() -> Self {
        MemoryFabric::new().connection("local")
    }

    /// The fabric this connection belongs to.
    pub fn fabric(&self) -> &Arc<MemoryFabric> {
        &self.fabric
    }

    fn ensure_open(&self) -> TransportResult<()> {
        match *self.status.lock() {
            ConnectionStatus::Open => Ok(()),
            ConnectionStatus::Idle => Err(TransportError::NotConnected {
                transport: self.name.clone(),
            }),
            ConnectionStatus::Closed => Err(TransportError::Closed {
                transport: self.name.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("name", &self.name)
            .field("status", &*self.status.lock())
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> TransportResult<()> {
        let mut status = self.status.lock();
        match *status {
            ConnectionStatus::Open => Ok(()),
            ConnectionStatus::Closed => Err(TransportError::Closed {
                transport: self.name.clone(),
            }),
            ConnectionStatus::Idle => {
                *status = ConnectionStatus::Open;
                info!(transport = %self.name, "Memory transport connected");
                Ok(())
            }
        }
    }

    async fn publish(&self, topic: &str, payload: Payload) -> TransportResult<()> {
        self.ensure_open()?;
        self.fabric.publish(topic, payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        mode: DeliveryMode,
    ) -> TransportResult<TransportSubscription> {
        self.ensure_open()?;
        let subscription = self.fabric.subscribe(topic, mode, self.connection);
        self.subscriptions.lock().insert(subscription.id);
        Ok(subscription)
    }

    async fn unsubscribe(&self, id: TransportSubscriptionId) -> TransportResult<()> {
        if self.subscriptions.lock().remove(&id) {
            self.fabric.unsubscribe(id, self.connection);
        }
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        {
            let mut status = self.status.lock();
            if *status == ConnectionStatus::Closed {
                return Ok(());
            }
            *status = ConnectionStatus::Closed;
        }
        let ids: Vec<_> = self.subscriptions.lock().drain().collect();
        for id in ids {
            self.fabric.unsubscribe(id, self.connection);
        }
        info!(transport = %self.name, "Memory transport closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    async fn open(fabric: &Arc<MemoryFabric>, name: &str) -> MemoryTransport {
        let transport = fabric.connection(name);
        transport.connect().await.unwrap();
        transport
    }

    async fn next(sub: &mut TransportSubscription) -> Option<Payload> {
        timeout(Duration::from_millis(200), sub.deliveries.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let transport = MemoryTransport::standalone();
        let result = transport.publish("t", b"x".to_vec()).await;
        assert!(matches!(result, Err(TransportError::NotConnected { .. })));

        assert_ok!(transport.connect().await);
        assert_ok!(transport.publish("t", b"x".to_vec()).await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_instance() {
        let fabric = MemoryFabric::new();
        let a = open(&fabric, "a").await;
        let b = open(&fabric, "b").await;

        let mut sub_a = a.subscribe("t", DeliveryMode::Broadcast).await.unwrap();
        let mut sub_b = b.subscribe("t", DeliveryMode::Broadcast).await.unwrap();

        a.publish("t", b"one".to_vec()).await.unwrap();

        assert_eq!(next(&mut sub_a).await, Some(b"one".to_vec()));
        assert_eq!(next(&mut sub_b).await, Some(b"one".to_vec()));
    }

    #[tokio::test]
    async fn test_work_queue_delivers_each_payload_once() {
        let fabric = MemoryFabric::new();
        let a = open(&fabric, "a").await;
        let b = open(&fabric, "b").await;

        let mut sub_a = a.subscribe("jobs", DeliveryMode::WorkQueue).await.unwrap();
        let mut sub_b = b.subscribe("jobs", DeliveryMode::WorkQueue).await.unwrap();

        for i in 0..6u8 {
            a.publish("jobs", vec![i]).await.unwrap();
        }

        let mut seen = Vec::new();
        while let Some(p) = next(&mut sub_a).await {
            seen.push(p);
            if seen.len() == 3 {
                break;
            }
        }
        while let Some(p) = next(&mut sub_b).await {
            seen.push(p);
        }
        while let Some(p) = next(&mut sub_a).await {
            seen.push(p);
        }

        seen.sort();
        assert_eq!(seen, (0..6u8).map(|i| vec![i]).collect::<Vec<_>>());
        assert_eq!(fabric.retained("jobs"), 0);
    }

    #[tokio::test]
    async fn test_work_queue_retains_until_consumer_enrolls() {
        let fabric = MemoryFabric::new();
        let producer = open(&fabric, "producer").await;

        producer.publish("jobs", b"early".to_vec()).await.unwrap();
        assert_eq!(fabric.retained("jobs"), 1);

        let consumer = open(&fabric, "consumer").await;
        let mut sub = consumer
            .subscribe("jobs", DeliveryMode::WorkQueue)
            .await
            .unwrap();
        assert_eq!(next(&mut sub).await, Some(b"early".to_vec()));
    }

    #[tokio::test]
    async fn test_retention_limit_drops_oldest() {
        let fabric = MemoryFabric::with_retention_limit(2);
        let producer = open(&fabric, "producer").await;
        for i in 0..3u8 {
            producer.publish("jobs", vec![i]).await.unwrap();
        }
        assert_eq!(fabric.retained("jobs"), 2);

        let mut sub = producer
            .subscribe("jobs", DeliveryMode::WorkQueue)
            .await
            .unwrap();
        assert_eq!(next(&mut sub).await, Some(vec![1]));
        assert_eq!(next(&mut sub).await, Some(vec![2]));
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream() {
        let fabric = MemoryFabric::new();
        let transport = open(&fabric, "a").await;
        let mut sub = transport
            .subscribe("jobs", DeliveryMode::WorkQueue)
            .await
            .unwrap();
        assert_eq!(fabric.subscriber_count("jobs"), 1);

        transport.unsubscribe(sub.id).await.unwrap();
        assert_eq!(fabric.subscriber_count("jobs"), 0);
        assert_eq!(sub.deliveries.next().await, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let fabric = MemoryFabric::new();
        let transport = open(&fabric, "a").await;
        let mut sub = transport.subscribe("t", DeliveryMode::Broadcast).await.unwrap();

        assert_ok!(transport.close().await);
        assert_ok!(transport.close().await);

        assert_eq!(sub.deliveries.next().await, None);
        assert_eq!(fabric.subscriber_count("t"), 0);
        assert_err!(transport.publish("t", b"late".to_vec()).await);
        assert_err!(transport.connect().await);
    }
}
