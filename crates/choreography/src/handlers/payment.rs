//! Payment-service coordinator: consumes `order.created` and drives a
//! payment attempt to `succeeded` or `failed`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use common::{AggregateId, CorrelationId};
use domain::{
    Payment, PaymentFailedPayload, PaymentRepository, PaymentSucceededPayload, event_types,
};
use messaging::{
    EventEnvelope, EventHandler, HandlerError, MessageBus, MessagingError, ReliablePublisher,
};

use crate::error::ChoreographyError;
use crate::idempotency::{IdempotencyGuard, IdempotencyKey};
use crate::services::{PaymentProcessor, PaymentRequest, ProcessorOutcome};

const CONSUMER_NAME: &str = "payment-service";

/// Coordinator step for `order.created`.
///
/// Creates a Payment in `pending`, moves it to `processing`, invokes
/// the provider under a timeout, settles the attempt and publishes
/// `payment.succeeded` or `payment.failed` with the originating
/// correlation id. A provider timeout or transport error is a failure
/// outcome, not a handler error: the payment lands in `failed` and the
/// event still goes out.
pub struct PaymentEventHandler<R, P, B>
where
    R: PaymentRepository,
    P: PaymentProcessor,
    B: MessageBus + 'static,
{
    repository: Arc<R>,
    processor: Arc<P>,
    publisher: ReliablePublisher<B>,
    guard: Arc<dyn IdempotencyGuard>,
    processor_timeout: Duration,
}

impl<R, P, B> PaymentEventHandler<R, P, B>
where
    R: PaymentRepository,
    P: PaymentProcessor,
    B: MessageBus + 'static,
{
    /// Creates the handler with a 5 second provider timeout.
    pub fn new(
        repository: Arc<R>,
        processor: Arc<P>,
        publisher: ReliablePublisher<B>,
        guard: Arc<dyn IdempotencyGuard>,
    ) -> Self {
        Self::with_timeout(
            repository,
            processor,
            publisher,
            guard,
            Duration::from_secs(5),
        )
    }

    /// Creates the handler with an explicit provider timeout.
    pub fn with_timeout(
        repository: Arc<R>,
        processor: Arc<P>,
        publisher: ReliablePublisher<B>,
        guard: Arc<dyn IdempotencyGuard>,
        processor_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            processor,
            publisher,
            guard,
            processor_timeout,
        }
    }

    #[tracing::instrument(skip(self, envelope), fields(aggregate_id = %envelope.aggregate_id))]
    async fn initiate_payment(&self, envelope: &EventEnvelope) -> Result<(), ChoreographyError> {
        let payload: domain::OrderCreatedPayload = envelope.payload_as()?;
        let correlation = envelope
            .correlation_id
            .clone()
            .unwrap_or_else(CorrelationId::new);

        let payment = Payment::create(
            payload.order_id,
            payload.user_id,
            payload.amount,
            payload.currency,
            payload.method,
            correlation.clone(),
        )
        .map_err(domain::DomainError::from)?;
        self.repository.save(payment.clone()).await?;

        let payment = payment
            .mark_processing(None)
            .map_err(domain::DomainError::from)?;
        self.repository.save(payment.clone()).await?;

        let request = PaymentRequest {
            payment_id: payment.id(),
            order_id: payment.order_id(),
            amount: payment.amount(),
            currency: payment.currency(),
            method: payment.method(),
        };
        let started = std::time::Instant::now();
        let outcome =
            match tokio::time::timeout(self.processor_timeout, self.processor.process(&request))
                .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => ProcessorOutcome::Declined {
                    failure_reason: err.to_string(),
                },
                Err(_) => ProcessorOutcome::Declined {
                    failure_reason: ChoreographyError::ProcessorTimeout(self.processor_timeout)
                        .to_string(),
                },
            };
        metrics::histogram!("payment_processing_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match outcome {
            ProcessorOutcome::Approved {
                provider_transaction_id,
                provider_response,
            } => {
                let payment = payment
                    .mark_succeeded(
                        Some(provider_transaction_id.clone()),
                        Some(provider_response),
                    )
                    .map_err(domain::DomainError::from)?;
                self.repository.save(payment.clone()).await?;

                self.publish(
                    event_types::PAYMENT_SUCCEEDED,
                    payment.id(),
                    &correlation,
                    &PaymentSucceededPayload {
                        payment_id: payment.id(),
                        order_id: payment.order_id(),
                        provider_transaction_id,
                        amount: payment.amount(),
                    },
                )
                .await?;

                metrics::counter!("payments_succeeded_total").increment(1);
                tracing::info!(payment_id = %payment.id(), order_id = %payment.order_id(), "payment succeeded");
            }
            ProcessorOutcome::Declined { failure_reason } => {
                let payment = payment
                    .mark_failed(failure_reason.clone())
                    .map_err(domain::DomainError::from)?;
                self.repository.save(payment.clone()).await?;

                self.publish(
                    event_types::PAYMENT_FAILED,
                    payment.id(),
                    &correlation,
                    &PaymentFailedPayload {
                        payment_id: payment.id(),
                        order_id: payment.order_id(),
                        user_id: payment.user_id(),
                        failure_reason: failure_reason.clone(),
                        retry_count: payment.retry_count(),
                    },
                )
                .await?;

                metrics::counter!("payments_failed_total").increment(1);
                tracing::warn!(
                    payment_id = %payment.id(),
                    order_id = %payment.order_id(),
                    %failure_reason,
                    "payment failed"
                );
            }
        }

        Ok(())
    }

    async fn publish<T: Serialize>(
        &self,
        event_type: &str,
        aggregate_id: AggregateId,
        correlation: &CorrelationId,
        payload: &T,
    ) -> Result<(), ChoreographyError> {
        let envelope = EventEnvelope::builder()
            .event_type(event_type)
            .aggregate_id(aggregate_id)
            .correlation_id(correlation.clone())
            .payload(payload)
            .map_err(MessagingError::from)
            .map_err(domain::DomainError::from)?
            .build();
        self.publisher
            .publish(&envelope)
            .await
            .map_err(domain::DomainError::from)?;
        Ok(())
    }
}

#[async_trait]
impl<R, P, B> EventHandler for PaymentEventHandler<R, P, B>
where
    R: PaymentRepository,
    P: PaymentProcessor,
    B: MessageBus + 'static,
{
    fn name(&self) -> &'static str {
        CONSUMER_NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if envelope.event_type != event_types::ORDER_CREATED {
            tracing::debug!(event_type = %envelope.event_type, "ignoring unrelated event");
            return Ok(());
        }

        let key = IdempotencyKey::for_envelope(self.name(), envelope);
        if !self.guard.should_apply(&key).await {
            tracing::debug!(aggregate_id = %envelope.aggregate_id, "already applied, acking duplicate");
            return Ok(());
        }

        match self.initiate_payment(envelope).await {
            Ok(()) => {
                self.guard.mark_applied(&key).await;
                Ok(())
            }
            Err(err) => {
                self.guard.release(&key).await;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::InMemoryIdempotencyGuard;
    use crate::services::SimulatedPaymentProcessor;
    use domain::{
        Currency, InMemoryPaymentRepository, Money, OrderCreatedPayload, OrderItem, PaymentMethod,
        PaymentStatus, UserId,
    };
    use messaging::{Delivery, InMemoryBroker};
    use tokio::sync::mpsc;

    type Handler =
        PaymentEventHandler<InMemoryPaymentRepository, SimulatedPaymentProcessor, InMemoryBroker>;

    async fn setup() -> (
        Handler,
        Arc<InMemoryPaymentRepository>,
        SimulatedPaymentProcessor,
        mpsc::Receiver<Delivery>,
    ) {
        let broker = InMemoryBroker::new();
        let rx = broker.declare_queue("observer", 16).await.unwrap();
        broker.bind_queue("observer", "payment.*").await.unwrap();

        let repository = Arc::new(InMemoryPaymentRepository::new());
        let processor = SimulatedPaymentProcessor::with_max_latency(Duration::ZERO);
        let handler = PaymentEventHandler::new(
            Arc::clone(&repository),
            Arc::new(processor.clone()),
            ReliablePublisher::new(Arc::new(broker)),
            Arc::new(InMemoryIdempotencyGuard::new()),
        );
        (handler, repository, processor, rx)
    }

    fn order_created(order_id: AggregateId) -> EventEnvelope {
        let payload = OrderCreatedPayload {
            order_id,
            user_id: UserId::new(),
            amount: Money::from_dollars(100),
            currency: Currency::Usd,
            method: PaymentMethod::Card,
            items: vec![OrderItem::new("prod-1", "Widget", 1, Money::from_dollars(100))],
        };
        EventEnvelope::builder()
            .event_type(event_types::ORDER_CREATED)
            .aggregate_id(order_id)
            .correlation_id(CorrelationId::from_string("corr-1"))
            .payload(&payload)
            .unwrap()
            .build()
    }

    #[tokio::test]
    async fn test_approved_charge_publishes_payment_succeeded() {
        let (handler, repository, _processor, mut rx) = setup().await;
        let order_id = AggregateId::new();

        handler.handle(&order_created(order_id)).await.unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.envelope.event_type, event_types::PAYMENT_SUCCEEDED);
        assert_eq!(
            delivery.envelope.correlation_id,
            Some(CorrelationId::from_string("corr-1"))
        );
        let payload: PaymentSucceededPayload = delivery.envelope.payload_as().unwrap();
        assert_eq!(payload.order_id, order_id);
        assert_eq!(payload.provider_transaction_id, "tx-0001");

        let payments = repository.find_by_order_id(order_id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status(), PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_declined_charge_publishes_payment_failed() {
        let (handler, repository, processor, mut rx) = setup().await;
        processor.set_decline(Some("card declined"));
        let order_id = AggregateId::new();

        handler.handle(&order_created(order_id)).await.unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.envelope.event_type, event_types::PAYMENT_FAILED);
        let payload: PaymentFailedPayload = delivery.envelope.payload_as().unwrap();
        assert_eq!(payload.failure_reason, "card declined");
        assert_eq!(payload.retry_count, 0);

        let payments = repository.find_by_order_id(order_id).await.unwrap();
        assert_eq!(payments[0].status(), PaymentStatus::Failed);
        assert_eq!(payments[0].failure_reason(), Some("card declined"));
    }

    #[tokio::test]
    async fn test_transport_error_becomes_failure_outcome() {
        let (handler, repository, processor, mut rx) = setup().await;
        processor.set_transport_error(Some("connection reset"));
        let order_id = AggregateId::new();

        handler.handle(&order_created(order_id)).await.unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.envelope.event_type, event_types::PAYMENT_FAILED);
        let payments = repository.find_by_order_id(order_id).await.unwrap();
        assert_eq!(payments[0].status(), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_provider_timeout_becomes_failure_outcome() {
        struct StalledProcessor;

        #[async_trait]
        impl crate::services::PaymentProcessor for StalledProcessor {
            async fn process(
                &self,
                _request: &PaymentRequest,
            ) -> Result<ProcessorOutcome, ChoreographyError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(ChoreographyError::Processor("unreachable".to_string()))
            }
        }

        let broker = InMemoryBroker::new();
        let mut rx = broker.declare_queue("observer", 16).await.unwrap();
        broker.bind_queue("observer", "payment.*").await.unwrap();

        let repository = Arc::new(InMemoryPaymentRepository::new());
        let handler = PaymentEventHandler::with_timeout(
            Arc::clone(&repository),
            Arc::new(StalledProcessor),
            ReliablePublisher::new(Arc::new(broker)),
            Arc::new(InMemoryIdempotencyGuard::new()),
            Duration::from_millis(5),
        );
        let order_id = AggregateId::new();

        handler.handle(&order_created(order_id)).await.unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.envelope.event_type, event_types::PAYMENT_FAILED);
        let payload: PaymentFailedPayload = delivery.envelope.payload_as().unwrap();
        assert!(payload.failure_reason.contains("timed out"));

        let payments = repository.find_by_order_id(order_id).await.unwrap();
        assert_eq!(payments[0].status(), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_creates_one_payment() {
        let (handler, repository, _processor, mut rx) = setup().await;
        let order_id = AggregateId::new();
        let envelope = order_created(order_id);

        handler.handle(&envelope).await.unwrap();
        handler.handle(&envelope).await.unwrap();

        assert_eq!(
            repository.find_by_order_id(order_id).await.unwrap().len(),
            1
        );
        rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unrelated_event_is_acked_untouched() {
        let (handler, repository, _processor, _rx) = setup().await;

        let envelope = EventEnvelope::builder()
            .event_type(event_types::ORDER_SHIPPED)
            .aggregate_id(AggregateId::new())
            .payload_raw(serde_json::json!({}))
            .build();
        handler.handle(&envelope).await.unwrap();

        assert_eq!(
            repository
                .find_by_order_id(envelope.aggregate_id)
                .await
                .unwrap()
                .len(),
            0
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_discarded() {
        let (handler, _repository, _processor, _rx) = setup().await;

        let envelope = EventEnvelope::builder()
            .event_type(event_types::ORDER_CREATED)
            .aggregate_id(AggregateId::new())
            .payload_raw(serde_json::json!({"not": "an order"}))
            .build();

        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Discard(_)));
    }
}
