//! Order aggregate and related types.

mod aggregate;
mod history;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use history::{InMemoryOrderHistory, OrderHistoryEntry, OrderHistoryStore};
pub use service::OrderService;
pub use state::{InvalidOrderTransition, OrderStatus};
pub use value_objects::{Currency, Money, OrderItem, PaymentMethod, ProductId, UserId};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The state machine rejected the requested status change.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidOrderTransition),

    /// Order has no items.
    #[error("order must have at least one item")]
    NoItems,

    /// Invalid quantity.
    #[error("invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Negative unit price snapshot.
    #[error("invalid unit price: {cents} cents (must not be negative)")]
    NegativePrice { cents: i64 },

    /// Items can only change while the order is pending.
    #[error("items are locked once the order leaves pending (current: {status})")]
    ItemsLocked { status: OrderStatus },

    /// Item not found in order.
    #[error("item not found: {product_id}")]
    ItemNotFound { product_id: String },

    /// Marking paid requires a payment reference.
    #[error("payment reference must not be empty")]
    MissingPaymentReference,
}
