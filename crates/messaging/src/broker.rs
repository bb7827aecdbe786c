use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};

use crate::envelope::{EventEnvelope, MessageProperties};
use crate::error::{MessagingError, Result};
use crate::topic::routing_key_matches;

/// A message as delivered to a queue: the envelope plus broker-level
/// properties and the routing key it was published under.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: EventEnvelope,
    pub properties: MessageProperties,
    pub routing_key: String,
}

/// A message that exhausted its retries (or was rejected outright) and
/// was routed to the dead-letter queue, with failure metadata for
/// operator inspection.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub delivery: Delivery,
    pub source_queue: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Transport abstraction the publisher writes through.
///
/// Implemented by [`InMemoryBroker`]; tests substitute failing
/// implementations to exercise the retry path.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Delivers the envelope to every queue whose binding matches the
    /// routing key (the event type). Suspends on back-pressure until
    /// the receiving queues drain; returns only after every matched
    /// queue accepted the message.
    async fn publish(&self, envelope: &EventEnvelope, properties: MessageProperties)
    -> Result<()>;

    /// Whether the broker connection is currently usable.
    async fn is_available(&self) -> bool;

    /// Attempts to re-establish the broker connection.
    async fn reconnect(&self) -> Result<()>;
}

struct BrokerInner {
    /// Declared queues by name. Bounded channels: a full queue makes
    /// `publish` wait, which is the back-pressure mechanism.
    queues: HashMap<String, mpsc::Sender<Delivery>>,

    /// (pattern, queue name) bindings on the topic exchange.
    bindings: Vec<(String, String)>,

    /// The shared dead-letter queue for this deployment.
    dead_letters: Vec<DeadLetter>,

    /// Simulated connection state; `false` makes publishes fail with
    /// `PublishUnavailable` until `reconnect` is called.
    connected: bool,
}

/// In-memory topic-exchange broker.
///
/// One durable topic exchange: routing key = event type, queues bound
/// by pattern (`order.*`, `inventory.updated`, `#`). Provides the same
/// interface a real broker binding would, so the choreography code is
/// transport-agnostic.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<RwLock<BrokerInner>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Creates a new connected broker with no queues.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(BrokerInner {
                queues: HashMap::new(),
                bindings: Vec::new(),
                dead_letters: Vec::new(),
                connected: true,
            })),
        }
    }

    /// Declares a durable queue and returns its delivery stream.
    ///
    /// `capacity` bounds the number of undelivered messages; a full
    /// queue suspends publishers rather than dropping messages.
    pub async fn declare_queue(
        &self,
        name: impl Into<String>,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Delivery>> {
        let name = name.into();
        let mut inner = self.inner.write().await;
        if inner.queues.contains_key(&name) {
            return Err(MessagingError::QueueAlreadyDeclared(name));
        }
        let (tx, rx) = mpsc::channel(capacity);
        inner.queues.insert(name, tx);
        Ok(rx)
    }

    /// Binds a declared queue to a routing-key pattern.
    pub async fn bind_queue(&self, queue: &str, pattern: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.queues.contains_key(queue) {
            return Err(MessagingError::UnknownQueue(queue.to_string()));
        }
        inner.bindings.push((pattern.into(), queue.to_string()));
        Ok(())
    }

    /// Puts a message back on the named queue (negative acknowledge
    /// with requeue). Used by consumers for the retry-with-delay path.
    pub async fn requeue(&self, queue: &str, delivery: Delivery) -> Result<()> {
        let sender = {
            let inner = self.inner.read().await;
            inner
                .queues
                .get(queue)
                .cloned()
                .ok_or_else(|| MessagingError::UnknownQueue(queue.to_string()))?
        };
        sender
            .send(delivery)
            .await
            .map_err(|_| MessagingError::UnknownQueue(queue.to_string()))
    }

    /// Routes a message to the shared dead-letter queue.
    pub async fn dead_letter(&self, dead_letter: DeadLetter) {
        metrics::counter!("messages_dead_lettered_total").increment(1);
        let mut inner = self.inner.write().await;
        inner.dead_letters.push(dead_letter);
    }

    /// Returns a snapshot of the dead-letter queue.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.read().await.dead_letters.clone()
    }

    /// Simulates a dropped broker connection (test hook).
    pub async fn set_connected(&self, connected: bool) {
        self.inner.write().await.connected = connected;
    }

    /// Number of messages currently waiting on the named queue.
    pub async fn queue_depth(&self, queue: &str) -> Option<usize> {
        let inner = self.inner.read().await;
        inner
            .queues
            .get(queue)
            .map(|tx| tx.max_capacity() - tx.capacity())
    }
}

#[async_trait]
impl MessageBus for InMemoryBroker {
    async fn publish(
        &self,
        envelope: &EventEnvelope,
        properties: MessageProperties,
    ) -> Result<()> {
        let routing_key = envelope.event_type.clone();

        // Collect matched senders under the lock, then send without it:
        // a full queue must suspend the publisher, not the exchange.
        let targets: Vec<(String, mpsc::Sender<Delivery>)> = {
            let inner = self.inner.read().await;
            if !inner.connected {
                return Err(MessagingError::PublishUnavailable(
                    "broker connection lost".to_string(),
                ));
            }

            let mut seen = Vec::new();
            let mut targets = Vec::new();
            for (pattern, queue) in &inner.bindings {
                if seen.contains(queue) || !routing_key_matches(pattern, &routing_key) {
                    continue;
                }
                if let Some(sender) = inner.queues.get(queue) {
                    seen.push(queue.clone());
                    targets.push((queue.clone(), sender.clone()));
                }
            }
            targets
        };

        if targets.is_empty() {
            tracing::debug!(%routing_key, "no queue bound for routing key, message dropped");
            return Ok(());
        }

        for (queue, sender) in targets {
            let delivery = Delivery {
                envelope: envelope.clone(),
                properties: properties.clone(),
                routing_key: routing_key.clone(),
            };
            if sender.send(delivery).await.is_err() {
                tracing::warn!(%queue, %routing_key, "queue receiver gone, delivery dropped");
            }
        }

        metrics::counter!("messages_published_total").increment(1);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.inner.read().await.connected
    }

    async fn reconnect(&self) -> Result<()> {
        self.inner.write().await.connected = true;
        Ok(())
    }
}
