//! Order status state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected order status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid order status transition: {from} -> {to}")]
pub struct InvalidOrderTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// The status of an order in its lifecycle.
///
/// Transitions:
/// ```text
/// pending ──► awaiting_payment ──► paid ──► shipped ──► completed
///    │               │               │         │
///    └───────────────┴───────────────┴─────────┴──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order is being assembled, items can be added/removed.
    #[default]
    Pending,

    /// Order has been placed, payment is due.
    AwaitingPayment,

    /// Payment confirmed.
    Paid,

    /// Order has left the warehouse.
    Shipped,

    /// Order delivered (terminal).
    Completed,

    /// Order was cancelled (terminal).
    Cancelled,
}

impl OrderStatus {
    /// All statuses, for exhaustive table checks.
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::AwaitingPayment,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Returns true if `target` is reachable from this status in one step.
    ///
    /// Pairs not listed in the table are rejected, including
    /// self-transitions.
    pub fn is_valid_transition(self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, target),
            (Pending, AwaitingPayment)
                | (Pending, Cancelled)
                | (AwaitingPayment, Paid)
                | (AwaitingPayment, Cancelled)
                | (Paid, Shipped)
                | (Paid, Cancelled)
                | (Shipped, Completed)
                | (Shipped, Cancelled)
        )
    }

    /// Moves to `target` if the table allows it.
    pub fn transition(self, target: OrderStatus) -> Result<OrderStatus, InvalidOrderTransition> {
        if self.is_valid_transition(target) {
            Ok(target)
        } else {
            Err(InvalidOrderTransition {
                from: self,
                to: target,
            })
        }
    }

    /// Returns true if items can be modified in this status.
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns the status name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
