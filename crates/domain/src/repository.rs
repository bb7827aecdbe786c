//! Aggregate repositories: trait plus in-memory implementation.
//!
//! Each service is the only writer of its own aggregates; repositories
//! never cross service boundaries.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::AggregateId;

use crate::error::DomainError;
use crate::order::{Order, UserId};
use crate::payment::Payment;

/// Storage for the order service's aggregates.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists the given order state, replacing any previous state.
    async fn save(&self, order: Order) -> Result<(), DomainError>;

    /// Loads one order.
    async fn find_by_id(&self, id: AggregateId) -> Result<Option<Order>, DomainError>;

    /// Lists a user's orders.
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, DomainError>;
}

/// Storage for the payment service's aggregates.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Persists the given payment state, replacing any previous state.
    async fn save(&self, payment: Payment) -> Result<(), DomainError>;

    /// Loads one payment.
    async fn find_by_id(&self, id: AggregateId) -> Result<Option<Payment>, DomainError>;

    /// Lists the payment attempts made for one order.
    async fn find_by_order_id(&self, order_id: AggregateId) -> Result<Vec<Payment>, DomainError>;
}

/// In-memory order repository.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<AggregateId, Order>>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: Order) -> Result<(), DomainError> {
        self.orders.write().await.insert(order.id(), order);
        Ok(())
    }

    async fn find_by_id(&self, id: AggregateId) -> Result<Option<Order>, DomainError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, DomainError> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at());
        Ok(orders)
    }
}

/// In-memory payment repository.
#[derive(Clone, Default)]
pub struct InMemoryPaymentRepository {
    payments: Arc<RwLock<HashMap<AggregateId, Payment>>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn save(&self, payment: Payment) -> Result<(), DomainError> {
        self.payments.write().await.insert(payment.id(), payment);
        Ok(())
    }

    async fn find_by_id(&self, id: AggregateId) -> Result<Option<Payment>, DomainError> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn find_by_order_id(&self, order_id: AggregateId) -> Result<Vec<Payment>, DomainError> {
        let mut payments: Vec<Payment> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.order_id() == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at());
        Ok(payments)
    }
}
