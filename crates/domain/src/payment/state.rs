//! Payment status state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected payment status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid payment status transition: {from} -> {to}")]
pub struct InvalidPaymentTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

/// The status of a payment attempt.
///
/// Transitions:
/// ```text
/// pending ──► processing ──► succeeded
///    ▲   │        │    └───► failed ──┐
///    │   │        │                   │
///    │   └────────┴──► cancelled      │
///    └────────────────────────────────┘ (retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, not yet handed to the provider.
    #[default]
    Pending,

    /// In flight at the payment provider.
    Processing,

    /// Settled (terminal).
    Succeeded,

    /// Rejected or errored; may be retried back to pending.
    Failed,

    /// Abandoned before settling (terminal).
    Cancelled,
}

impl PaymentStatus {
    /// All statuses, for exhaustive table checks.
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Succeeded,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
    ];

    /// Returns true if `target` is reachable from this status in one step.
    pub fn is_valid_transition(self, target: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, target),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Succeeded)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Failed, Pending)
        )
    }

    /// Moves to `target` if the table allows it.
    pub fn transition(
        self,
        target: PaymentStatus,
    ) -> Result<PaymentStatus, InvalidPaymentTransition> {
        if self.is_valid_transition(target) {
            Ok(target)
        } else {
            Err(InvalidPaymentTransition {
                from: self,
                to: target,
            })
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded | PaymentStatus::Cancelled)
    }

    /// Returns the status name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;

    const TABLE: [(PaymentStatus, PaymentStatus); 6] = [
        (Pending, Processing),
        (Pending, Cancelled),
        (Processing, Succeeded),
        (Processing, Failed),
        (Processing, Cancelled),
        (Failed, Pending),
    ];

    #[test]
    fn test_full_cross_product_matches_table() {
        for from in PaymentStatus::ALL {
            for to in PaymentStatus::ALL {
                let expected = TABLE.contains(&(from, to));
                assert_eq!(
                    from.is_valid_transition(to),
                    expected,
                    "({from}, {to}) should be {expected}"
                );
                assert_eq!(from.transition(to).is_ok(), expected);
            }
        }
    }

    #[test]
    fn test_self_transitions_rejected() {
        for status in PaymentStatus::ALL {
            assert!(!status.is_valid_transition(status));
        }
    }

    #[test]
    fn test_failed_is_retryable_not_terminal() {
        assert!(!Failed.is_terminal());
        assert!(Failed.is_valid_transition(Pending));
    }

    #[test]
    fn test_terminal_states() {
        assert!(Succeeded.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Processing.is_terminal());
    }

    #[test]
    fn test_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(Succeeded.to_string(), "succeeded");
    }
}
