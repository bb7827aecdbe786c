//! Idempotency guard: turns at-least-once delivery into
//! effectively-once application.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use common::AggregateId;
use messaging::EventEnvelope;

/// Identity of one logical application of an event by one consumer.
///
/// The attempt signature is derived from the envelope occurrence time:
/// broker redeliveries of the same published message share it, while a
/// genuinely new occurrence of the same event type gets a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub consumer: String,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub attempt: String,
}

impl IdempotencyKey {
    /// Builds the key for a consumer processing an envelope.
    pub fn for_envelope(consumer: &str, envelope: &EventEnvelope) -> Self {
        Self {
            consumer: consumer.to_string(),
            aggregate_id: envelope.aggregate_id,
            event_type: envelope.event_type.clone(),
            attempt: envelope.attempt_signature(),
        }
    }
}

/// Tracks which events a consumer has already applied.
///
/// `should_apply` atomically claims the key: when two deliveries of the
/// same message race, exactly one gets `true`. A handler that fails
/// after claiming must `release` so the broker's retry can pass the
/// guard again.
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Claims the key. Returns false if it was already claimed or applied.
    async fn should_apply(&self, key: &IdempotencyKey) -> bool;

    /// Finalizes a successful application.
    async fn mark_applied(&self, key: &IdempotencyKey);

    /// Frees an unfinalized claim after a handler failure.
    async fn release(&self, key: &IdempotencyKey);
}

#[derive(Debug, Clone, Copy)]
enum RecordState {
    /// Claimed, handler still running.
    InFlight,

    /// Applied for good; never claimable again.
    Applied { applied_at: DateTime<Utc> },
}

/// In-memory idempotency guard.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyGuard {
    records: Arc<RwLock<HashMap<IdempotencyKey, RecordState>>>,
}

impl InMemoryIdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns when the key was applied, if it was.
    pub async fn applied_at(&self, key: &IdempotencyKey) -> Option<DateTime<Utc>> {
        match self.records.read().await.get(key) {
            Some(RecordState::Applied { applied_at }) => Some(*applied_at),
            _ => None,
        }
    }
}

#[async_trait]
impl IdempotencyGuard for InMemoryIdempotencyGuard {
    async fn should_apply(&self, key: &IdempotencyKey) -> bool {
        let mut records = self.records.write().await;
        if records.contains_key(key) {
            metrics::counter!("idempotency_skips_total").increment(1);
            return false;
        }
        records.insert(key.clone(), RecordState::InFlight);
        true
    }

    async fn mark_applied(&self, key: &IdempotencyKey) {
        self.records
            .write()
            .await
            .insert(key.clone(), RecordState::Applied {
                applied_at: Utc::now(),
            });
    }

    async fn release(&self, key: &IdempotencyKey) {
        let mut records = self.records.write().await;
        if let Some(RecordState::InFlight) = records.get(key) {
            records.remove(key);
        }
    }
}
