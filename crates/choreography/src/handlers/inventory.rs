//! Product-service coordinator: applies stock deltas from
//! `inventory.updated`.

use std::sync::Arc;

use async_trait::async_trait;

use domain::{InventoryUpdatedPayload, StockChange, event_types};
use messaging::{EventEnvelope, EventHandler, HandlerError};

use crate::error::ChoreographyError;
use crate::idempotency::{IdempotencyGuard, IdempotencyKey};
use crate::services::StockStore;

const CONSUMER_NAME: &str = "product-service";

/// Coordinator step for `inventory.updated`.
///
/// Increment and decrement map directly onto the two stock primitives;
/// `set` is translated into a computed increment or decrement over the
/// current level so both paths share the same primitives.
pub struct InventoryEventHandler<S: StockStore> {
    store: Arc<S>,
    guard: Arc<dyn IdempotencyGuard>,
}

impl<S: StockStore> InventoryEventHandler<S> {
    pub fn new(store: Arc<S>, guard: Arc<dyn IdempotencyGuard>) -> Self {
        Self { store, guard }
    }

    #[tracing::instrument(skip(self, envelope))]
    async fn apply_change(&self, envelope: &EventEnvelope) -> Result<(), ChoreographyError> {
        let payload: InventoryUpdatedPayload = envelope.payload_as()?;
        let product_id = &payload.product_id;

        let level = match payload.change {
            StockChange::Increment(quantity) => self.store.increment(product_id, quantity).await?,
            StockChange::Decrement(quantity) => self.store.decrement(product_id, quantity).await?,
            StockChange::Set(target) => {
                let current = self.store.level(product_id).await?;
                if target > current {
                    self.store.increment(product_id, target - current).await?
                } else if target < current {
                    self.store.decrement(product_id, current - target).await?
                } else {
                    current
                }
            }
        };

        metrics::counter!("stock_updates_total").increment(1);
        tracing::debug!(%product_id, level, "stock updated");
        Ok(())
    }
}

#[async_trait]
impl<S: StockStore> EventHandler for InventoryEventHandler<S> {
    fn name(&self) -> &'static str {
        CONSUMER_NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if envelope.event_type != event_types::INVENTORY_UPDATED {
            return Ok(());
        }

        let key = IdempotencyKey::for_envelope(self.name(), envelope);
        if !self.guard.should_apply(&key).await {
            return Ok(());
        }

        match self.apply_change(envelope).await {
            Ok(()) => {
                self.guard.mark_applied(&key).await;
                Ok(())
            }
            Err(err) => {
                self.guard.release(&key).await;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::InMemoryIdempotencyGuard;
    use crate::services::InMemoryStockStore;
    use common::AggregateId;
    use domain::ProductId;

    fn setup() -> (InventoryEventHandler<InMemoryStockStore>, Arc<InMemoryStockStore>) {
        let store = Arc::new(InMemoryStockStore::new());
        let handler = InventoryEventHandler::new(
            Arc::clone(&store),
            Arc::new(InMemoryIdempotencyGuard::new()),
        );
        (handler, store)
    }

    fn envelope(product: &str, change: StockChange) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type(event_types::INVENTORY_UPDATED)
            .aggregate_id(AggregateId::new())
            .payload(&InventoryUpdatedPayload {
                product_id: ProductId::new(product),
                change,
            })
            .unwrap()
            .build()
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let (handler, store) = setup();

        handler
            .handle(&envelope("prod-1", StockChange::Increment(10)))
            .await
            .unwrap();
        handler
            .handle(&envelope("prod-1", StockChange::Decrement(4)))
            .await
            .unwrap();

        assert_eq!(store.level(&ProductId::new("prod-1")).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_set_computes_a_delta() {
        let (handler, store) = setup();
        let sku = ProductId::new("prod-1");
        store.increment(&sku, 10).await.unwrap();

        // Set below: computed decrement.
        handler
            .handle(&envelope("prod-1", StockChange::Set(3)))
            .await
            .unwrap();
        assert_eq!(store.level(&sku).await.unwrap(), 3);

        // Set above: computed increment.
        handler
            .handle(&envelope("prod-1", StockChange::Set(8)))
            .await
            .unwrap();
        assert_eq!(store.level(&sku).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_duplicate_decrement_applies_once() {
        let (handler, store) = setup();
        let sku = ProductId::new("prod-1");
        store.increment(&sku, 10).await.unwrap();

        let env = envelope("prod-1", StockChange::Decrement(4));
        handler.handle(&env).await.unwrap();
        handler.handle(&env).await.unwrap();

        assert_eq!(store.level(&sku).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_oversized_decrement_is_retriable() {
        let (handler, _store) = setup();

        let err = handler
            .handle(&envelope("prod-1", StockChange::Decrement(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Retriable(_)));
    }
}
