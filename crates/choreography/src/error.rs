//! Errors raised inside choreography coordinators, and their
//! classification into the consumer's retry/discard semantics.

use std::time::Duration;

use thiserror::Error;

use domain::DomainError;
use messaging::HandlerError;

/// Errors that can occur while handling a consumed event.
#[derive(Debug, Error)]
pub enum ChoreographyError {
    /// A domain use case failed.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The envelope payload did not match the expected schema.
    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The payment processor reported a transport-level error.
    #[error("payment processor error: {0}")]
    Processor(String),

    /// The payment processor did not answer in time.
    #[error("payment processing timed out after {0:?}")]
    ProcessorTimeout(Duration),

    /// The notification provider could not send.
    #[error("notification provider error: {0}")]
    Notification(String),

    /// A stock operation referenced more units than available.
    #[error("insufficient stock for {product_id}: have {available}, need {requested}")]
    InsufficientStock {
        product_id: String,
        available: u32,
        requested: u32,
    },
}

impl From<ChoreographyError> for HandlerError {
    /// Classifies an error for the consumer.
    ///
    /// State machine rejections and malformed payloads are discarded:
    /// redelivering them can never succeed (a stale redelivery asking
    /// for an already-applied transition is an anomaly to log, not to
    /// retry). Everything else is retriable and takes the
    /// retry-count/DLQ path.
    fn from(err: ChoreographyError) -> Self {
        match &err {
            ChoreographyError::Domain(domain) if domain.is_invalid_transition() => {
                HandlerError::Discard(err.to_string())
            }
            ChoreographyError::Payload(_) => HandlerError::Discard(err.to_string()),
            _ => HandlerError::Retriable(err.to_string()),
        }
    }
}
