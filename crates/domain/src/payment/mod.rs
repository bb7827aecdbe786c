//! Payment aggregate and related types.

mod aggregate;
mod state;

pub use aggregate::Payment;
pub use state::{InvalidPaymentTransition, PaymentStatus};

use thiserror::Error;

/// Errors that can occur during payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The state machine rejected the requested status change.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidPaymentTransition),

    /// Amount must be positive and is fixed at creation.
    #[error("invalid amount: {cents} cents (must be greater than 0)")]
    NonPositiveAmount { cents: i64 },

    /// Settling requires a provider transaction reference.
    #[error("provider transaction reference must not be empty")]
    MissingProviderReference,
}
