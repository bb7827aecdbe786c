//! Pluggable policy for what a payment failure does to the order.
//!
//! The order service never force-cancels on its own: the failure is
//! always recorded in history, and the policy decides whether anything
//! further happens.

use domain::PaymentFailedPayload;

/// What the order-side coordinator does after recording a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    /// Leave the order `awaiting_payment`, retryable.
    RecordOnly,

    /// Cancel the order with the given reason.
    CancelOrder { reason: String },
}

/// Strategy consulted on every consumed `payment.failed`.
pub trait PaymentFailurePolicy: Send + Sync {
    /// Policy name, recorded as the cancelling actor.
    fn name(&self) -> &'static str;

    /// Decides the action for one failure.
    fn decide(&self, payload: &PaymentFailedPayload) -> FailureAction;
}

/// Default policy: record the failure and leave the order retryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordOnly;

impl PaymentFailurePolicy for RecordOnly {
    fn name(&self) -> &'static str {
        "record-only-policy"
    }

    fn decide(&self, _payload: &PaymentFailedPayload) -> FailureAction {
        FailureAction::RecordOnly
    }
}

/// Cancels the order once a payment has failed more than
/// `max_attempts` times.
#[derive(Debug, Clone, Copy)]
pub struct CancelAfterAttempts {
    pub max_attempts: u32,
}

impl PaymentFailurePolicy for CancelAfterAttempts {
    fn name(&self) -> &'static str {
        "cancel-after-attempts-policy"
    }

    fn decide(&self, payload: &PaymentFailedPayload) -> FailureAction {
        if payload.retry_count >= self.max_attempts {
            FailureAction::CancelOrder {
                reason: format!(
                    "payment failed after {} attempts: {}",
                    payload.retry_count + 1,
                    payload.failure_reason
                ),
            }
        } else {
            FailureAction::RecordOnly
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;

    fn payload(retry_count: u32) -> PaymentFailedPayload {
        PaymentFailedPayload {
            payment_id: AggregateId::new(),
            order_id: AggregateId::new(),
            user_id: domain::UserId::new(),
            failure_reason: "card declined".to_string(),
            retry_count,
        }
    }

    #[test]
    fn test_record_only_never_cancels() {
        let policy = RecordOnly;
        assert_eq!(policy.decide(&payload(0)), FailureAction::RecordOnly);
        assert_eq!(policy.decide(&payload(10)), FailureAction::RecordOnly);
    }

    #[test]
    fn test_cancel_after_attempts_threshold() {
        let policy = CancelAfterAttempts { max_attempts: 2 };
        assert_eq!(policy.decide(&payload(0)), FailureAction::RecordOnly);
        assert_eq!(policy.decide(&payload(1)), FailureAction::RecordOnly);
        assert!(matches!(
            policy.decide(&payload(2)),
            FailureAction::CancelOrder { .. }
        ));
    }
}
