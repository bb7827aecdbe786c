//! Order use cases: the synchronous, HTTP-facing side of the flow.
//!
//! Every mutating use case follows the same order: apply exactly one
//! state transition, persist, append history, publish. Persisting
//! before publishing means a crash between the two causes at most a
//! redundant retry downstream, never a lost state change.

use std::sync::Arc;

use serde::Serialize;

use common::AggregateId;
use messaging::{EventEnvelope, MessageBus, MessagingError, ReliablePublisher};

use crate::error::DomainError;
use crate::events::{
    OrderCancelledPayload, OrderCompletedPayload, OrderCreatedPayload, OrderPaidPayload,
    OrderShippedPayload, event_types,
};
use crate::order::{
    Currency, Money, Order, OrderHistoryEntry, OrderHistoryStore, OrderItem, OrderStatus,
    PaymentMethod, UserId,
};
use crate::repository::OrderRepository;

/// Actor recorded in history entries written by this service.
const CHANGED_BY: &str = "order-service";

/// Service exposing the order service's use cases.
pub struct OrderService<R, H, B>
where
    R: OrderRepository,
    H: OrderHistoryStore,
    B: MessageBus + 'static,
{
    repository: Arc<R>,
    history: Arc<H>,
    publisher: ReliablePublisher<B>,
}

impl<R, H, B> OrderService<R, H, B>
where
    R: OrderRepository,
    H: OrderHistoryStore,
    B: MessageBus + 'static,
{
    /// Creates a new order service.
    pub fn new(repository: Arc<R>, history: Arc<H>, publisher: ReliablePublisher<B>) -> Self {
        Self {
            repository,
            history,
            publisher,
        }
    }

    /// Creates an order in `pending`. Nothing is published yet; the
    /// choreography starts when the order is placed.
    #[tracing::instrument(skip(self, items), fields(user_id = %user_id))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        items: Vec<OrderItem>,
    ) -> Result<Order, DomainError> {
        let order = Order::create(user_id, items, common::CorrelationId::new())?;
        self.repository.save(order.clone()).await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id(), total_cents = order.total().cents(), "order created");
        Ok(order)
    }

    /// Places an order: `pending -> awaiting_payment`, publishing
    /// `order.created` so the payment service starts an attempt.
    ///
    /// Currency and method ride on the request because the order model
    /// carries neither; they parameterize the payment attempt.
    #[tracing::instrument(skip(self))]
    pub async fn place_order(
        &self,
        order_id: AggregateId,
        currency: Currency,
        method: PaymentMethod,
    ) -> Result<Order, DomainError> {
        let order = self.load(order_id).await?;
        let old_status = order.status();
        let order = order.place()?;
        self.repository.save(order.clone()).await?;

        self.record(&order, old_status, "order placed, payment due")
            .await?;
        self.publish(
            event_types::ORDER_CREATED,
            &order,
            &OrderCreatedPayload {
                order_id: order.id(),
                user_id: order.user_id(),
                amount: order.total(),
                currency,
                method,
                items: order.items().to_vec(),
            },
        )
        .await?;

        metrics::counter!("orders_placed_total").increment(1);
        Ok(order)
    }

    /// Records a settled payment: `awaiting_payment -> paid`, publishing
    /// `order.paid`. Invoked by the payment-succeeded coordinator.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_id: AggregateId,
        payment_id: AggregateId,
        payment_reference: String,
        amount: Money,
    ) -> Result<Order, DomainError> {
        let order = self.load(order_id).await?;
        let old_status = order.status();
        let order = order.mark_paid(payment_reference.clone())?;
        self.repository.save(order.clone()).await?;

        self.history
            .append(
                OrderHistoryEntry::new(
                    order.id(),
                    old_status,
                    order.status(),
                    CHANGED_BY,
                    "payment succeeded",
                )
                .with_metadata("paymentId", serde_json::json!(payment_id.to_string())),
            )
            .await?;
        self.publish(
            event_types::ORDER_PAID,
            &order,
            &OrderPaidPayload {
                order_id: order.id(),
                user_id: order.user_id(),
                payment_id,
                payment_reference,
                amount,
            },
        )
        .await?;

        metrics::counter!("orders_paid_total").increment(1);
        Ok(order)
    }

    /// Records a failed payment attempt in history without touching the
    /// order status; the order stays `awaiting_payment` and retryable.
    #[tracing::instrument(skip(self))]
    pub async fn record_payment_failure(
        &self,
        order_id: AggregateId,
        payment_id: AggregateId,
        failure_reason: String,
    ) -> Result<(), DomainError> {
        let order = self.load(order_id).await?;
        self.history
            .append(
                OrderHistoryEntry::new(
                    order.id(),
                    order.status(),
                    order.status(),
                    CHANGED_BY,
                    "payment failed",
                )
                .with_metadata("paymentId", serde_json::json!(payment_id.to_string()))
                .with_metadata("failureReason", serde_json::json!(failure_reason)),
            )
            .await?;

        metrics::counter!("order_payment_failures_total").increment(1);
        Ok(())
    }

    /// Ships the order: `paid -> shipped`, publishing `order.shipped`.
    #[tracing::instrument(skip(self))]
    pub async fn ship_order(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        let order = self.load(order_id).await?;
        let old_status = order.status();
        let order = order.ship()?;
        self.repository.save(order.clone()).await?;

        self.record(&order, old_status, "order shipped").await?;
        self.publish(
            event_types::ORDER_SHIPPED,
            &order,
            &OrderShippedPayload {
                order_id: order.id(),
            },
        )
        .await?;
        Ok(order)
    }

    /// Completes the order: `shipped -> completed`, publishing
    /// `order.completed`.
    #[tracing::instrument(skip(self))]
    pub async fn complete_order(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        let order = self.load(order_id).await?;
        let old_status = order.status();
        let order = order.complete()?;
        self.repository.save(order.clone()).await?;

        self.record(&order, old_status, "order completed").await?;
        self.publish(
            event_types::ORDER_COMPLETED,
            &order,
            &OrderCompletedPayload {
                order_id: order.id(),
            },
        )
        .await?;
        Ok(order)
    }

    /// Cancels the order from any non-terminal status, publishing
    /// `order.cancelled`.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: AggregateId,
        reason: String,
        cancelled_by: String,
    ) -> Result<Order, DomainError> {
        let order = self.load(order_id).await?;
        let old_status = order.status();
        let order = order.cancel()?;
        self.repository.save(order.clone()).await?;

        self.history
            .append(OrderHistoryEntry::new(
                order.id(),
                old_status,
                order.status(),
                cancelled_by.clone(),
                reason.clone(),
            ))
            .await?;
        self.publish(
            event_types::ORDER_CANCELLED,
            &order,
            &OrderCancelledPayload {
                order_id: order.id(),
                reason,
                cancelled_by,
            },
        )
        .await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        Ok(order)
    }

    /// Loads an order by ID. Returns None if it doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.repository.find_by_id(order_id).await
    }

    /// Returns the audit history of one order, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn get_history(
        &self,
        order_id: AggregateId,
    ) -> Result<Vec<OrderHistoryEntry>, DomainError> {
        self.history.for_order(order_id).await
    }

    /// Lists a user's orders.
    #[tracing::instrument(skip(self))]
    pub async fn get_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, DomainError> {
        self.repository.find_by_user(user_id).await
    }

    async fn load(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.repository
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| DomainError::order_not_found(order_id))
    }

    async fn record(
        &self,
        order: &Order,
        old_status: OrderStatus,
        reason: &str,
    ) -> Result<(), DomainError> {
        self.history
            .append(OrderHistoryEntry::new(
                order.id(),
                old_status,
                order.status(),
                CHANGED_BY,
                reason,
            ))
            .await
    }

    async fn publish<P: Serialize>(
        &self,
        event_type: &str,
        order: &Order,
        payload: &P,
    ) -> Result<(), DomainError> {
        let envelope = EventEnvelope::builder()
            .event_type(event_type)
            .aggregate_id(order.id())
            .correlation_id(order.correlation_id().clone())
            .payload(payload)
            .map_err(MessagingError::from)?
            .build();
        self.publisher.publish(&envelope).await?;
        Ok(())
    }
}
