//! Order aggregate root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{AggregateId, CorrelationId};

use super::OrderError;
use super::state::OrderStatus;
use super::value_objects::{Money, OrderItem, ProductId, UserId};

/// An order, the aggregate root of the order service.
///
/// Orders are immutable values: every operation consumes `self` and
/// returns a new instance, so a handler never observes a half-applied
/// transition. All status changes go through [`OrderStatus::transition`];
/// there is no way to set the status directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: AggregateId,
    user_id: UserId,
    items: Vec<OrderItem>,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    correlation_id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_reference: Option<String>,
}

impl Order {
    /// Creates a new order in `pending` with the given items.
    ///
    /// Items must be non-empty, every quantity positive and every unit
    /// price non-negative.
    pub fn create(
        user_id: UserId,
        items: Vec<OrderItem>,
        correlation_id: CorrelationId,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            Self::validate_item(item)?;
        }

        let now = Utc::now();
        Ok(Self {
            id: AggregateId::new(),
            user_id,
            items,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            correlation_id,
            payment_reference: None,
        })
    }

    fn validate_item(item: &OrderItem) -> Result<(), OrderError> {
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                quantity: item.quantity,
            });
        }
        if item.unit_price.is_negative() {
            return Err(OrderError::NegativePrice {
                cents: item.unit_price.cents(),
            });
        }
        Ok(())
    }

    // Accessors

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_reference.as_deref()
    }

    /// Total amount: sum of quantity times unit price snapshot.
    pub fn total(&self) -> Money {
        self.items
            .iter()
            .fold(Money::zero(), |acc, item| acc + item.total_price())
    }

    // Item mutation, only while pending

    /// Adds an item. Items are mutable only while the order is `pending`.
    pub fn add_item(self, item: OrderItem) -> Result<Self, OrderError> {
        if !self.status.can_modify_items() {
            return Err(OrderError::ItemsLocked {
                status: self.status,
            });
        }
        Self::validate_item(&item)?;

        let mut items = self.items;
        items.push(item);
        Ok(Self {
            items,
            updated_at: Utc::now(),
            ..self
        })
    }

    /// Removes the item with the given product ID.
    ///
    /// Removing the last item is rejected so the non-empty invariant
    /// holds at all times.
    pub fn remove_item(self, product_id: &ProductId) -> Result<Self, OrderError> {
        if !self.status.can_modify_items() {
            return Err(OrderError::ItemsLocked {
                status: self.status,
            });
        }
        if !self.items.iter().any(|i| &i.product_id == product_id) {
            return Err(OrderError::ItemNotFound {
                product_id: product_id.to_string(),
            });
        }
        if self.items.len() == 1 {
            return Err(OrderError::NoItems);
        }

        let items = self
            .items
            .into_iter()
            .filter(|i| &i.product_id != product_id)
            .collect();
        Ok(Self {
            items,
            updated_at: Utc::now(),
            ..self
        })
    }

    // Status transitions

    /// Places the order: `pending -> awaiting_payment`. Payment becomes due.
    pub fn place(self) -> Result<Self, OrderError> {
        self.with_status(OrderStatus::AwaitingPayment)
    }

    /// Records payment: `awaiting_payment -> paid`.
    ///
    /// Requires a non-empty payment reference correlating the order to
    /// the payment that settled it.
    pub fn mark_paid(self, payment_reference: impl Into<String>) -> Result<Self, OrderError> {
        let payment_reference = payment_reference.into();
        if payment_reference.is_empty() {
            return Err(OrderError::MissingPaymentReference);
        }
        let next = self.with_status(OrderStatus::Paid)?;
        Ok(Self {
            payment_reference: Some(payment_reference),
            ..next
        })
    }

    /// Ships the order: `paid -> shipped`.
    pub fn ship(self) -> Result<Self, OrderError> {
        self.with_status(OrderStatus::Shipped)
    }

    /// Completes the order: `shipped -> completed`.
    pub fn complete(self) -> Result<Self, OrderError> {
        self.with_status(OrderStatus::Completed)
    }

    /// Cancels the order from any non-terminal status.
    pub fn cancel(self) -> Result<Self, OrderError> {
        self.with_status(OrderStatus::Cancelled)
    }

    fn with_status(self, target: OrderStatus) -> Result<Self, OrderError> {
        let status = self.status.transition(target)?;
        Ok(Self {
            status,
            updated_at: Utc::now(),
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: &str, quantity: u32, cents: i64) -> OrderItem {
        OrderItem::new(product, format!("{product} name"), quantity, Money::from_cents(cents))
    }

    fn new_order() -> Order {
        Order::create(
            UserId::new(),
            vec![item("prod-1", 2, 1000)],
            CorrelationId::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_starts_pending_with_total() {
        let order = new_order();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total().cents(), 2000);
        assert!(order.payment_reference().is_none());
        assert!(order.created_at() <= order.updated_at());
    }

    #[test]
    fn test_create_rejects_empty_items() {
        let result = Order::create(UserId::new(), vec![], CorrelationId::new());
        assert!(matches!(result, Err(OrderError::NoItems)));
    }

    #[test]
    fn test_create_rejects_zero_quantity() {
        let result = Order::create(
            UserId::new(),
            vec![item("prod-1", 0, 1000)],
            CorrelationId::new(),
        );
        assert!(matches!(
            result,
            Err(OrderError::InvalidQuantity { quantity: 0 })
        ));
    }

    #[test]
    fn test_create_rejects_negative_price() {
        let result = Order::create(
            UserId::new(),
            vec![item("prod-1", 1, -5)],
            CorrelationId::new(),
        );
        assert!(matches!(result, Err(OrderError::NegativePrice { .. })));
    }

    #[test]
    fn test_place_moves_to_awaiting_payment() {
        let order = new_order().place().unwrap();
        assert_eq!(order.status(), OrderStatus::AwaitingPayment);
    }

    #[test]
    fn test_pending_cannot_jump_to_completed() {
        let order = new_order();
        let err = order.with_status(OrderStatus::Completed).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition(_)));
    }

    #[test]
    fn test_full_lifecycle() {
        let order = new_order()
            .place()
            .unwrap()
            .mark_paid("PAY-0001")
            .unwrap()
            .ship()
            .unwrap()
            .complete()
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);
        assert_eq!(order.payment_reference(), Some("PAY-0001"));
    }

    #[test]
    fn test_mark_paid_requires_reference() {
        let order = new_order().place().unwrap();
        let err = order.mark_paid("").unwrap_err();
        assert!(matches!(err, OrderError::MissingPaymentReference));
    }

    #[test]
    fn test_mark_paid_rejected_while_pending() {
        let order = new_order();
        let err = order.mark_paid("PAY-0001").unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition(_)));
    }

    #[test]
    fn test_cancel_from_non_terminal() {
        assert_eq!(
            new_order().cancel().unwrap().status(),
            OrderStatus::Cancelled
        );
        assert_eq!(
            new_order().place().unwrap().cancel().unwrap().status(),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn test_cancel_from_terminal_rejected() {
        let cancelled = new_order().cancel().unwrap();
        assert!(matches!(
            cancelled.cancel(),
            Err(OrderError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_items_locked_after_placing() {
        let order = new_order().place().unwrap();
        let err = order.add_item(item("prod-2", 1, 500)).unwrap_err();
        assert!(matches!(
            err,
            OrderError::ItemsLocked {
                status: OrderStatus::AwaitingPayment
            }
        ));
    }

    #[test]
    fn test_add_and_remove_items_while_pending() {
        let order = new_order().add_item(item("prod-2", 1, 500)).unwrap();
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.total().cents(), 2500);

        let order = order.remove_item(&ProductId::new("prod-2")).unwrap();
        assert_eq!(order.items().len(), 1);
    }

    #[test]
    fn test_removing_last_item_rejected() {
        let order = new_order();
        let err = order.remove_item(&ProductId::new("prod-1")).unwrap_err();
        assert!(matches!(err, OrderError::NoItems));
    }

    #[test]
    fn test_removing_unknown_item_rejected() {
        let order = new_order();
        let err = order.remove_item(&ProductId::new("missing")).unwrap_err();
        assert!(matches!(err, OrderError::ItemNotFound { .. }));
    }
}
