//! Event choreography for the order/payment flow.
//!
//! No central orchestrator: each service consumes the events it cares
//! about, applies one state transition, and publishes the next event.
//! This crate provides the per-service coordinator handlers, the
//! idempotency guard that makes at-least-once delivery effectively
//! once, the payment-failure policy hook, and the simulated external
//! capabilities (payment processor, notification provider, stock store).

pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod policy;
pub mod services;

pub use error::ChoreographyError;
pub use handlers::{
    InventoryEventHandler, NotificationEventHandler, OrderEventHandler, PaymentEventHandler,
};
pub use idempotency::{IdempotencyGuard, IdempotencyKey, InMemoryIdempotencyGuard};
pub use policy::{CancelAfterAttempts, FailureAction, PaymentFailurePolicy, RecordOnly};
pub use services::{
    InMemoryStockStore, Notification, NotificationChannel, NotificationProvider, PaymentProcessor,
    PaymentRequest, ProcessorOutcome, SendReceipt, SimulatedNotificationProvider,
    SimulatedPaymentProcessor, StockStore,
};
