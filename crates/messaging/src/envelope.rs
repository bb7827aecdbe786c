use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{AggregateId, CorrelationId};

/// Header carrying the number of delivery attempts already consumed.
/// Absent means zero.
pub const X_RETRY_COUNT: &str = "x-retry-count";

/// The canonical wire representation of a domain event.
///
/// Serialized as JSON with camelCase keys:
/// `{"eventType": "order.created", "aggregateId": "...",
///   "occurredOn": "...", "correlationId": "...", "payload": {...}}`.
///
/// The event type is a dotted name and doubles as the routing key on
/// the topic exchange. It is immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Dotted event name, e.g. `order.created`.
    pub event_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// When the event occurred.
    pub occurred_on: DateTime<Utc>,

    /// Identifier tying this event back to one logical request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,

    /// Schema specific to the event type.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Deserializes the payload into a concrete event type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// A signature identifying this logical occurrence of the event.
    ///
    /// Broker redeliveries of the same published message share it, while
    /// a genuinely new occurrence (e.g. a fresh payment attempt) gets a
    /// new one. Used as the attempt component of idempotency keys.
    pub fn attempt_signature(&self) -> String {
        self.occurred_on.timestamp_millis().to_string()
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    occurred_on: Option<DateTime<Utc>>,
    correlation_id: Option<CorrelationId>,
    payload: Option<serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Sets the occurrence time. If not set, the current time is used.
    pub fn occurred_on(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_on = Some(at);
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the event envelope.
    ///
    /// # Panics
    ///
    /// Panics if `event_type`, `aggregate_id` or `payload` are not set.
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            event_type: self.event_type.expect("event_type is required"),
            aggregate_id: self.aggregate_id.expect("aggregate_id is required"),
            occurred_on: self.occurred_on.unwrap_or_else(Utc::now),
            correlation_id: self.correlation_id,
            payload: self.payload.expect("payload is required"),
        }
    }
}

/// Broker-level properties attached to a published message, distinct
/// from the envelope body.
#[derive(Debug, Clone)]
pub struct MessageProperties {
    /// Message survives a broker restart.
    pub persistent: bool,

    /// Always `application/json` for envelopes.
    pub content_type: String,

    /// Mirror of the envelope correlation ID, for broker-side tracing.
    pub correlation_id: Option<CorrelationId>,

    /// Publish time in epoch milliseconds.
    pub timestamp: i64,

    /// Free-form headers; `x-retry-count` lives here.
    pub headers: HashMap<String, serde_json::Value>,
}

impl MessageProperties {
    /// Stamps the standard properties for an envelope about to be published.
    pub fn for_envelope(envelope: &EventEnvelope) -> Self {
        Self {
            persistent: true,
            content_type: "application/json".to_string(),
            correlation_id: envelope.correlation_id.clone(),
            timestamp: Utc::now().timestamp_millis(),
            headers: HashMap::new(),
        }
    }

    /// Reads the retry-count header. Absent means zero.
    pub fn retry_count(&self) -> u32 {
        self.headers
            .get(X_RETRY_COUNT)
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(0)
    }

    /// Returns a copy with the retry-count header set.
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.headers
            .insert(X_RETRY_COUNT.to_string(), serde_json::json!(count));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_builder_defaults_occurred_on() {
        let aggregate_id = AggregateId::new();
        let envelope = EventEnvelope::builder()
            .event_type("order.created")
            .aggregate_id(aggregate_id)
            .payload_raw(serde_json::json!({"total": 2000}))
            .build();

        assert_eq!(envelope.event_type, "order.created");
        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert!(envelope.correlation_id.is_none());
    }

    #[test]
    fn envelope_wire_format_uses_camel_case() {
        let envelope = EventEnvelope::builder()
            .event_type("payment.succeeded")
            .aggregate_id(AggregateId::new())
            .correlation_id(CorrelationId::from_string("corr-1"))
            .payload_raw(serde_json::json!({"ok": true}))
            .build();

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["eventType"], "payment.succeeded");
        assert!(json["aggregateId"].is_string());
        assert!(json["occurredOn"].is_string());
        assert_eq!(json["correlationId"], "corr-1");
        assert_eq!(json["payload"]["ok"], true);
    }

    #[test]
    fn envelope_omits_absent_correlation_id() {
        let envelope = EventEnvelope::builder()
            .event_type("order.created")
            .aggregate_id(AggregateId::new())
            .payload_raw(serde_json::json!({}))
            .build();

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("correlationId").is_none());
    }

    #[test]
    fn envelope_roundtrip() {
        let envelope = EventEnvelope::builder()
            .event_type("inventory.updated")
            .aggregate_id(AggregateId::new())
            .payload_raw(serde_json::json!({"delta": -2}))
            .build();

        let json = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, envelope.event_type);
        assert_eq!(back.aggregate_id, envelope.aggregate_id);
        assert_eq!(back.payload, envelope.payload);
    }

    #[test]
    fn attempt_signature_is_stable_across_redelivery() {
        let envelope = EventEnvelope::builder()
            .event_type("order.created")
            .aggregate_id(AggregateId::new())
            .payload_raw(serde_json::json!({}))
            .build();

        // A redelivered copy carries the same occurredOn, so the
        // signature matches.
        let copy = envelope.clone();
        assert_eq!(envelope.attempt_signature(), copy.attempt_signature());
    }

    #[test]
    fn properties_stamp_persistence_and_content_type() {
        let envelope = EventEnvelope::builder()
            .event_type("order.paid")
            .aggregate_id(AggregateId::new())
            .correlation_id(CorrelationId::from_string("corr-9"))
            .payload_raw(serde_json::json!({}))
            .build();

        let props = MessageProperties::for_envelope(&envelope);
        assert!(props.persistent);
        assert_eq!(props.content_type, "application/json");
        assert_eq!(
            props.correlation_id,
            Some(CorrelationId::from_string("corr-9"))
        );
        assert!(props.timestamp > 0);
    }

    #[test]
    fn retry_count_defaults_to_zero_and_increments() {
        let envelope = EventEnvelope::builder()
            .event_type("order.paid")
            .aggregate_id(AggregateId::new())
            .payload_raw(serde_json::json!({}))
            .build();

        let props = MessageProperties::for_envelope(&envelope);
        assert_eq!(props.retry_count(), 0);

        let bumped = props.with_retry_count(2);
        assert_eq!(bumped.retry_count(), 2);
    }
}
