//! Stock store: the product service's per-SKU stock levels.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use domain::ProductId;

use crate::error::ChoreographyError;

/// Per-product stock levels, exposing exactly two mutation primitives.
/// `set` deltas are resolved into one of these by the consumer.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Current level, zero if the product was never seen.
    async fn level(&self, product_id: &ProductId) -> Result<u32, ChoreographyError>;

    /// Adds units, returning the new level.
    async fn increment(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<u32, ChoreographyError>;

    /// Removes units, returning the new level. Fails if fewer than
    /// `quantity` units are available.
    async fn decrement(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<u32, ChoreographyError>;
}

/// In-memory stock store.
#[derive(Clone, Default)]
pub struct InMemoryStockStore {
    levels: Arc<RwLock<HashMap<ProductId, u32>>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn level(&self, product_id: &ProductId) -> Result<u32, ChoreographyError> {
        Ok(*self.levels.read().await.get(product_id).unwrap_or(&0))
    }

    async fn increment(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<u32, ChoreographyError> {
        let mut levels = self.levels.write().await;
        let level = levels.entry(product_id.clone()).or_insert(0);
        *level += quantity;
        Ok(*level)
    }

    async fn decrement(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<u32, ChoreographyError> {
        let mut levels = self.levels.write().await;
        let level = levels.entry(product_id.clone()).or_insert(0);
        if *level < quantity {
            return Err(ChoreographyError::InsufficientStock {
                product_id: product_id.to_string(),
                available: *level,
                requested: quantity,
            });
        }
        *level -= quantity;
        Ok(*level)
    }
}
