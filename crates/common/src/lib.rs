//! Shared types used across the order/payment choreography services.

pub mod types;

pub use types::{AggregateId, CorrelationId};
