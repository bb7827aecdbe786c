//! Domain layer: the aggregates and use cases of the order/payment flow.
//!
//! This crate provides:
//! - Order and Payment aggregates as immutable values guarded by
//!   transition-table state machines
//! - Domain event types and payload schemas
//! - Repository traits with in-memory implementations
//! - The order history audit store
//! - The order use-case service

pub mod error;
pub mod events;
pub mod order;
pub mod payment;
pub mod repository;

pub use error::DomainError;
pub use events::{
    InventoryUpdatedPayload, OrderCancelledPayload, OrderCompletedPayload, OrderCreatedPayload,
    OrderPaidPayload, OrderShippedPayload, PaymentFailedPayload, PaymentSucceededPayload,
    StockChange, event_types,
};
pub use order::{
    Currency, InMemoryOrderHistory, InvalidOrderTransition, Money, Order, OrderError,
    OrderHistoryEntry, OrderHistoryStore, OrderItem, OrderService, OrderStatus, PaymentMethod,
    ProductId, UserId,
};
pub use payment::{InvalidPaymentTransition, Payment, PaymentError, PaymentStatus};
pub use repository::{
    InMemoryOrderRepository, InMemoryPaymentRepository, OrderRepository, PaymentRepository,
};
