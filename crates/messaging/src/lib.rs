//! Messaging layer for the order/payment choreography system.
//!
//! Provides the pieces the services use to stay consistent without a
//! shared database transaction:
//! - [`EventEnvelope`]: the canonical wire form of a domain event
//! - [`InMemoryBroker`]: a durable-topic-exchange broker with
//!   pattern-bound queues and a dead-letter queue
//! - [`ReliablePublisher`]: at-least-once publish with backoff and a
//!   supervised reconnect task
//! - [`Consumer`]: prefetch-bounded delivery with ack/nack, retry-count
//!   tracking and dead-letter routing
//!
//! Delivery semantics are at-least-once everywhere; handlers are expected
//! to be idempotent.

pub mod broker;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod publisher;
pub mod topic;

pub use broker::{DeadLetter, Delivery, InMemoryBroker, MessageBus};
pub use consumer::{Consumer, ConsumerConfig, EventHandler, HandlerError};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder, MessageProperties, X_RETRY_COUNT};
pub use error::{MessagingError, Result};
pub use publisher::{PublisherConfig, ReliablePublisher};
pub use topic::routing_key_matches;

pub use common::{AggregateId, CorrelationId};
