//! Append-only audit history for order status changes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use common::AggregateId;

use super::state::OrderStatus;
use crate::error::DomainError;

/// One audit record of an order status change (or a recorded anomaly
/// such as a payment failure that left the status untouched).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderHistoryEntry {
    pub order_id: AggregateId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub changed_by: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    pub changed_at: DateTime<Utc>,
}

impl OrderHistoryEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(
        order_id: AggregateId,
        old_status: OrderStatus,
        new_status: OrderStatus,
        changed_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            old_status,
            new_status,
            changed_by: changed_by.into(),
            reason: reason.into(),
            metadata: HashMap::new(),
            changed_at: Utc::now(),
        }
    }

    /// Attaches a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Append-only store of order history entries.
#[async_trait]
pub trait OrderHistoryStore: Send + Sync {
    /// Appends one entry.
    async fn append(&self, entry: OrderHistoryEntry) -> Result<(), DomainError>;

    /// Returns the entries for one order, oldest first.
    async fn for_order(&self, order_id: AggregateId) -> Result<Vec<OrderHistoryEntry>, DomainError>;
}

/// In-memory history store.
#[derive(Clone, Default)]
pub struct InMemoryOrderHistory {
    entries: Arc<RwLock<Vec<OrderHistoryEntry>>>,
}

impl InMemoryOrderHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderHistoryStore for InMemoryOrderHistory {
    async fn append(&self, entry: OrderHistoryEntry) -> Result<(), DomainError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn for_order(
        &self,
        order_id: AggregateId,
    ) -> Result<Vec<OrderHistoryEntry>, DomainError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }
}
