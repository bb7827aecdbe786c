use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::MessageBus;
use crate::envelope::{EventEnvelope, MessageProperties};
use crate::error::{MessagingError, Result};

/// Tunables for the reliable publisher.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Immediate publish attempts before surfacing `PublishUnavailable`.
    pub max_attempts: u32,

    /// Backoff before the first retry; doubles per attempt.
    pub initial_backoff: Duration,

    /// Upper bound for the backoff between attempts.
    pub max_backoff: Duration,

    /// How often the reconnect supervisor checks broker availability.
    pub reconnect_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
            reconnect_interval: Duration::from_millis(500),
        }
    }
}

/// Publishes event envelopes to the topic exchange at-least-once.
///
/// Every publish stamps the standard message properties (persistent,
/// `application/json`, correlation id, epoch-ms timestamp) and retries
/// with exponential backoff while the broker is unavailable. A publish
/// that exhausts its attempts surfaces [`MessagingError::PublishUnavailable`]
/// to the caller, which decides whether that is fatal to the request.
///
/// A supervised reconnect task (see [`spawn_reconnect_supervisor`]) keeps
/// trying to restore a lost connection with backoff until process shutdown.
///
/// [`spawn_reconnect_supervisor`]: ReliablePublisher::spawn_reconnect_supervisor
#[derive(Clone)]
pub struct ReliablePublisher<B: MessageBus> {
    bus: Arc<B>,
    config: PublisherConfig,
}

impl<B: MessageBus + 'static> ReliablePublisher<B> {
    /// Creates a publisher with default configuration.
    pub fn new(bus: Arc<B>) -> Self {
        Self::with_config(bus, PublisherConfig::default())
    }

    /// Creates a publisher with the given configuration.
    pub fn with_config(bus: Arc<B>, config: PublisherConfig) -> Self {
        Self { bus, config }
    }

    /// Publishes one envelope, retrying transient unavailability.
    #[tracing::instrument(skip(self, envelope), fields(event_type = %envelope.event_type))]
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        let properties = MessageProperties::for_envelope(envelope);
        let mut backoff = self.config.initial_backoff;

        for attempt in 1..=self.config.max_attempts {
            match self.bus.publish(envelope, properties.clone()).await {
                Ok(()) => return Ok(()),
                Err(MessagingError::PublishUnavailable(reason)) => {
                    if attempt == self.config.max_attempts {
                        metrics::counter!("publish_unavailable_total").increment(1);
                        tracing::error!(
                            event_type = %envelope.event_type,
                            %reason,
                            attempts = attempt,
                            "publish failed after exhausting retries"
                        );
                        return Err(MessagingError::PublishUnavailable(reason));
                    }
                    tracing::warn!(
                        event_type = %envelope.event_type,
                        %reason,
                        attempt,
                        "broker unavailable, retrying publish"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                Err(other) => return Err(other),
            }
        }

        unreachable!("publish loop always returns within max_attempts")
    }

    /// Spawns the reconnect supervisor: while the broker is unreachable
    /// it retries `reconnect` with exponential backoff, and it stops as
    /// soon as the shutdown channel flips.
    pub fn spawn_reconnect_supervisor(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let bus = Arc::clone(&self.bus);
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut backoff = config.initial_backoff;
            loop {
                if *shutdown.borrow() {
                    break;
                }

                if bus.is_available().await {
                    backoff = config.initial_backoff;
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(config.reconnect_interval) => {}
                    }
                    continue;
                }

                tracing::warn!("broker connection lost, attempting reconnect");
                match bus.reconnect().await {
                    Ok(()) => {
                        tracing::info!("broker connection restored");
                        backoff = config.initial_backoff;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, backoff_ms = backoff.as_millis() as u64, "reconnect failed");
                        tokio::select! {
                            _ = shutdown.changed() => {}
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(config.max_backoff);
                    }
                }
            }
            tracing::debug!("reconnect supervisor stopped");
        })
    }
}
