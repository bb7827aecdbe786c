//! Domain event types and payload schemas.
//!
//! Event types are dotted names and double as routing keys on the topic
//! exchange. Payloads serialize with camelCase keys, matching the
//! envelope wire format.

use serde::{Deserialize, Serialize};

use common::AggregateId;

use crate::order::{Currency, Money, OrderItem, PaymentMethod, ProductId, UserId};

/// The dotted event names published by the choreography.
pub mod event_types {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_PAID: &str = "order.paid";
    pub const ORDER_SHIPPED: &str = "order.shipped";
    pub const ORDER_COMPLETED: &str = "order.completed";
    pub const ORDER_CANCELLED: &str = "order.cancelled";
    pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const INVENTORY_UPDATED: &str = "inventory.updated";
}

/// Payload of `order.created`, published when an order is placed and
/// payment becomes due. Carries everything the payment service needs
/// to start an attempt without a synchronous call back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedPayload {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub items: Vec<OrderItem>,
}

/// Payload of `order.paid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaidPayload {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub payment_id: AggregateId,
    pub payment_reference: String,
    pub amount: Money,
}

/// Payload of `order.shipped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderShippedPayload {
    pub order_id: AggregateId,
}

/// Payload of `order.completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCompletedPayload {
    pub order_id: AggregateId,
}

/// Payload of `order.cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelledPayload {
    pub order_id: AggregateId,
    pub reason: String,
    pub cancelled_by: String,
}

/// Payload of `payment.succeeded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSucceededPayload {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub provider_transaction_id: String,
    pub amount: Money,
}

/// Payload of `payment.failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailedPayload {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub failure_reason: String,
    pub retry_count: u32,
}

/// A stock delta carried by `inventory.updated`.
///
/// `set` is resolved by the consumer into a computed increment or
/// decrement over the current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum StockChange {
    Increment(u32),
    Decrement(u32),
    Set(u32),
}

/// Payload of `inventory.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUpdatedPayload {
    pub product_id: ProductId,
    pub change: StockChange,
}
