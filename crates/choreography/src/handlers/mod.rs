//! Per-service coordinator steps, one handler per consuming service.
//!
//! Every handler follows the same order: consult the idempotency
//! guard, apply exactly one state transition, persist, append history,
//! publish the next event. Persisting precedes publishing.

mod inventory;
mod notification;
mod order;
mod payment;

pub use inventory::InventoryEventHandler;
pub use notification::NotificationEventHandler;
pub use order::OrderEventHandler;
pub use payment::PaymentEventHandler;
