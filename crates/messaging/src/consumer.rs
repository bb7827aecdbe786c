use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;

use crate::broker::{DeadLetter, Delivery, InMemoryBroker};
use crate::envelope::EventEnvelope;
use crate::error::Result;

/// How a handler failure should be treated by the consumer.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Transient failure: the message is requeued with an incremented
    /// retry count, or dead-lettered once retries are exhausted.
    #[error("{0}")]
    Retriable(String),

    /// Non-retriable outcome (e.g. a stale redelivery rejected by the
    /// state machine): the message is acknowledged and the anomaly
    /// logged, never retried.
    #[error("{0}")]
    Discard(String),
}

/// A consumer-side message handler.
///
/// Handlers must tolerate duplicate delivery of the same envelope;
/// the broker guarantees at-least-once, not exactly-once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name of the consuming service, used in logs and as the
    /// consumer component of idempotency keys.
    fn name(&self) -> &'static str;

    /// Processes one decoded event envelope.
    async fn handle(&self, envelope: &EventEnvelope) -> std::result::Result<(), HandlerError>;
}

/// Consumer tunables.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Name of the durable queue this consumer owns.
    pub queue: String,

    /// Maximum unacknowledged messages in flight (back-pressure bound).
    pub prefetch: usize,

    /// Delivery attempts before a message is dead-lettered.
    pub max_retries: u32,

    /// Delay before a failed message is requeued.
    pub retry_delay: Duration,

    /// Queue capacity used when declaring the queue.
    pub queue_capacity: usize,
}

impl ConsumerConfig {
    /// Creates a config with the defaults: prefetch 1, 3 retries,
    /// 100ms requeue delay.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            prefetch: 1,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            queue_capacity: 64,
        }
    }

    /// Overrides the prefetch bound.
    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Overrides the retry maximum.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Overrides the requeue delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Overrides the declared queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// Prefetch-bounded queue consumer with retry-count tracking and
/// dead-letter routing.
///
/// For each message: invoke the handler; on success acknowledge. On a
/// retriable failure, read the `x-retry-count` header (absent = 0) and
/// increment it; below the configured maximum the message is requeued
/// after a delay, at or above it the message is routed to the DLQ and
/// the exhaustion recorded as an operator-visible failure.
pub struct Consumer<H: EventHandler + 'static> {
    broker: InMemoryBroker,
    receiver: mpsc::Receiver<Delivery>,
    handler: Arc<H>,
    config: ConsumerConfig,
}

impl<H: EventHandler + 'static> Consumer<H> {
    /// Declares the consumer's durable queue, binds it to the given
    /// routing-key patterns and returns the consumer, ready to spawn.
    pub async fn bind(
        broker: InMemoryBroker,
        handler: Arc<H>,
        config: ConsumerConfig,
        patterns: &[&str],
    ) -> Result<Self> {
        let receiver = broker
            .declare_queue(config.queue.clone(), config.queue_capacity)
            .await?;
        for pattern in patterns {
            broker.bind_queue(&config.queue, *pattern).await?;
        }
        Ok(Self {
            broker,
            receiver,
            handler,
            config,
        })
    }

    /// Spawns the consume loop. The loop stops when the shutdown
    /// channel flips; in-flight handlers drain best-effort because the
    /// permits they hold are simply dropped when they finish.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.config.prefetch));
        tracing::info!(
            queue = %self.config.queue,
            consumer = self.handler.name(),
            prefetch = self.config.prefetch,
            "consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // The permit is the prefetch bound on handler execution.
            // It is released before any requeue: the requeue sends
            // into this consumer's own bounded queue, which only
            // drains while the loop can acquire a permit to receive.
            let permit = tokio::select! {
                _ = shutdown.changed() => continue,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = shutdown.changed() => continue,
                delivery = self.receiver.recv() => match delivery {
                    Some(d) => d,
                    None => break,
                },
            };

            let broker = self.broker.clone();
            let handler = Arc::clone(&self.handler);
            let config = self.config.clone();
            tokio::spawn(process_delivery(broker, handler, config, delivery, permit));
        }

        tracing::info!(queue = %self.config.queue, "consumer stopped");
    }
}

async fn process_delivery<H: EventHandler>(
    broker: InMemoryBroker,
    handler: Arc<H>,
    config: ConsumerConfig,
    delivery: Delivery,
    permit: OwnedSemaphorePermit,
) {
    let event_type = delivery.envelope.event_type.clone();

    let outcome = handler.handle(&delivery.envelope).await;
    // The permit covers handler execution only. A requeue sends into
    // this consumer's own bounded queue: held across that send, a full
    // queue of poison messages would wedge the loop permanently.
    drop(permit);

    match outcome {
        Ok(()) => {
            metrics::counter!("messages_acked_total").increment(1);
            tracing::debug!(queue = %config.queue, %event_type, "message acknowledged");
        }
        Err(HandlerError::Discard(reason)) => {
            // Acked as non-retriable: typically a stale redelivery the
            // state machine already rejected.
            metrics::counter!("messages_discarded_total").increment(1);
            tracing::warn!(
                queue = %config.queue,
                consumer = handler.name(),
                %event_type,
                %reason,
                "message discarded as non-retriable"
            );
        }
        Err(HandlerError::Retriable(reason)) => {
            let attempt = delivery.properties.retry_count() + 1;
            if attempt < config.max_retries {
                metrics::counter!("messages_requeued_total").increment(1);
                tracing::warn!(
                    queue = %config.queue,
                    consumer = handler.name(),
                    %event_type,
                    %reason,
                    attempt,
                    "handler failed, requeueing with delay"
                );
                tokio::time::sleep(config.retry_delay).await;

                let mut retried = delivery;
                retried.properties = retried.properties.with_retry_count(attempt);
                if let Err(err) = broker.requeue(&config.queue, retried).await {
                    tracing::error!(queue = %config.queue, error = %err, "requeue failed");
                }
            } else {
                metrics::counter!("messages_retry_exhausted_total").increment(1);
                tracing::error!(
                    queue = %config.queue,
                    consumer = handler.name(),
                    %event_type,
                    %reason,
                    attempts = attempt,
                    "retries exhausted, routing message to dead-letter queue"
                );
                broker
                    .dead_letter(DeadLetter {
                        delivery,
                        source_queue: config.queue.clone(),
                        error: reason,
                        failed_at: Utc::now(),
                    })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MessageBus;
    use crate::envelope::MessageProperties;
    use common::AggregateId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type(event_type)
            .aggregate_id(AggregateId::new())
            .payload_raw(serde_json::json!({}))
            .build()
    }

    async fn publish(broker: &InMemoryBroker, event_type: &str) {
        let env = envelope(event_type);
        let props = MessageProperties::for_envelope(&env);
        broker.publish(&env, props).await.unwrap();
    }

    fn fast_config(queue: &str) -> ConsumerConfig {
        ConsumerConfig::new(queue).retry_delay(Duration::from_millis(1))
    }

    struct CountingHandler {
        calls: AtomicUsize,
        outcome: fn() -> std::result::Result<(), HandlerError>,
    }

    impl CountingHandler {
        fn new(outcome: fn() -> std::result::Result<(), HandlerError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome,
            })
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting-handler"
        }

        async fn handle(
            &self,
            _envelope: &EventEnvelope,
        ) -> std::result::Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn successful_handler_acks_each_message_once() {
        let broker = InMemoryBroker::new();
        let handler = CountingHandler::new(|| Ok(()));

        let consumer = Consumer::bind(
            broker.clone(),
            Arc::clone(&handler),
            fast_config("orders"),
            &["order.*"],
        )
        .await
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);

        publish(&broker, "order.created").await;
        publish(&broker, "order.paid").await;

        wait_for(|| handler.calls.load(Ordering::SeqCst) == 2).await;
        assert!(broker.dead_letters().await.is_empty());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failing_handler_is_retried_then_dead_lettered() {
        let broker = InMemoryBroker::new();
        let handler =
            CountingHandler::new(|| Err(HandlerError::Retriable("always fails".to_string())));

        let consumer = Consumer::bind(
            broker.clone(),
            Arc::clone(&handler),
            fast_config("payments").max_retries(3),
            &["order.created"],
        )
        .await
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);

        publish(&broker, "order.created").await;

        wait_for(|| handler.calls.load(Ordering::SeqCst) == 3).await;
        for _ in 0..500 {
            if !broker.dead_letters().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // Invoked exactly max_retries times, then dead-lettered and
        // never redelivered to the origin queue.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        let letters = broker.dead_letters().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].source_queue, "payments");
        assert_eq!(letters[0].delivery.properties.retry_count(), 2);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn poison_messages_on_a_full_queue_still_reach_the_dlq() {
        // With capacity 1 and prefetch 1, every requeue contends with
        // the queue's own capacity. The loop must keep draining so the
        // retries exhaust instead of wedging after the first attempt.
        let broker = InMemoryBroker::new();
        let handler =
            CountingHandler::new(|| Err(HandlerError::Retriable("always fails".to_string())));

        let consumer = Consumer::bind(
            broker.clone(),
            Arc::clone(&handler),
            fast_config("payments")
                .max_retries(3)
                .prefetch(1)
                .queue_capacity(1),
            &["order.created"],
        )
        .await
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);

        publish(&broker, "order.created").await;
        publish(&broker, "order.created").await;

        wait_for(|| handler.calls.load(Ordering::SeqCst) == 6).await;
        for _ in 0..500 {
            if broker.dead_letters().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 6);
        assert_eq!(broker.dead_letters().await.len(), 2);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn discard_is_acked_without_retry() {
        let broker = InMemoryBroker::new();
        let handler =
            CountingHandler::new(|| Err(HandlerError::Discard("stale redelivery".to_string())));

        let consumer = Consumer::bind(
            broker.clone(),
            Arc::clone(&handler),
            fast_config("orders"),
            &["payment.*"],
        )
        .await
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);

        publish(&broker, "payment.succeeded").await;

        wait_for(|| handler.calls.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(broker.dead_letters().await.is_empty());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_delivery_reaches_handler_twice() {
        // At-least-once semantics: dedup is the handler's job, not the
        // broker's.
        let broker = InMemoryBroker::new();
        let handler = CountingHandler::new(|| Ok(()));

        let consumer = Consumer::bind(
            broker.clone(),
            Arc::clone(&handler),
            fast_config("orders"),
            &["order.created"],
        )
        .await
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);

        let env = envelope("order.created");
        let props = MessageProperties::for_envelope(&env);
        broker.publish(&env, props.clone()).await.unwrap();
        broker.publish(&env, props).await.unwrap();

        wait_for(|| handler.calls.load(Ordering::SeqCst) == 2).await;

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn prefetch_bounds_concurrency() {
        struct SlowHandler {
            in_flight: AtomicUsize,
            max_seen: AtomicUsize,
            done: AtomicUsize,
        }

        #[async_trait]
        impl EventHandler for SlowHandler {
            fn name(&self) -> &'static str {
                "slow-handler"
            }

            async fn handle(
                &self,
                _envelope: &EventEnvelope,
            ) -> std::result::Result<(), HandlerError> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let broker = InMemoryBroker::new();
        let handler = Arc::new(SlowHandler {
            in_flight: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        });

        let consumer = Consumer::bind(
            broker.clone(),
            Arc::clone(&handler),
            fast_config("slow").prefetch(1),
            &["order.*"],
        )
        .await
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);

        for _ in 0..4 {
            publish(&broker, "order.created").await;
        }

        wait_for(|| handler.done.load(Ordering::SeqCst) == 4).await;
        assert_eq!(handler.max_seen.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn consumer_stops_on_shutdown() {
        let broker = InMemoryBroker::new();
        let handler = CountingHandler::new(|| Ok(()));

        let consumer = Consumer::bind(broker, handler, fast_config("orders"), &["order.*"])
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("consumer did not stop")
            .unwrap();
    }
}
