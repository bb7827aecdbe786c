//! Capability interfaces consumed by the coordinators, with simulated
//! implementations standing in for real providers.

mod inventory;
mod notifier;
mod processor;

pub use inventory::{InMemoryStockStore, StockStore};
pub use notifier::{
    Notification, NotificationChannel, NotificationProvider, SendReceipt,
    SimulatedNotificationProvider,
};
pub use processor::{
    PaymentProcessor, PaymentRequest, ProcessorOutcome, SimulatedPaymentProcessor,
};
