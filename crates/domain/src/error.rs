//! Domain-level error taxonomy.

use thiserror::Error;

use common::AggregateId;
use messaging::MessagingError;

use crate::order::OrderError;
use crate::payment::PaymentError;

/// Errors surfaced by domain use cases.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An order operation failed.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// A payment operation failed.
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// The requested aggregate does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: AggregateId },

    /// Publishing or encoding an event failed; `PublishUnavailable`
    /// means the broker could not be reached after retries.
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl DomainError {
    /// Convenience constructor for a missing order.
    pub fn order_not_found(id: AggregateId) -> Self {
        DomainError::NotFound { kind: "order", id }
    }

    /// Convenience constructor for a missing payment.
    pub fn payment_not_found(id: AggregateId) -> Self {
        DomainError::NotFound { kind: "payment", id }
    }

    /// Returns true if this error is a state machine rejection.
    ///
    /// Consumers ack such messages as non-retriable: a stale redelivery
    /// re-requesting an already-applied transition is an anomaly to log,
    /// not a reason to retry.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            DomainError::Order(OrderError::InvalidTransition(_))
                | DomainError::Payment(PaymentError::InvalidTransition(_))
        )
    }
}
