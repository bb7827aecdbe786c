//! Order-service coordinator: consumes payment outcomes and moves the
//! order forward (or records the failure and defers to policy).

use std::sync::Arc;

use async_trait::async_trait;

use domain::{
    OrderHistoryStore, OrderRepository, OrderService, PaymentFailedPayload,
    PaymentSucceededPayload, event_types,
};
use messaging::{EventEnvelope, EventHandler, HandlerError, MessageBus};

use crate::error::ChoreographyError;
use crate::idempotency::{IdempotencyGuard, IdempotencyKey};
use crate::policy::{FailureAction, PaymentFailurePolicy};

const CONSUMER_NAME: &str = "order-service";

/// Coordinator step for `payment.succeeded` and `payment.failed`.
///
/// On success the order moves `awaiting_payment -> paid` with the
/// provider reference recorded. On failure the order is never
/// force-cancelled here: the failure is recorded in history and the
/// configured [`PaymentFailurePolicy`] decides whether to cancel.
pub struct OrderEventHandler<R, H, B>
where
    R: OrderRepository,
    H: OrderHistoryStore,
    B: MessageBus + 'static,
{
    service: Arc<OrderService<R, H, B>>,
    guard: Arc<dyn IdempotencyGuard>,
    policy: Arc<dyn PaymentFailurePolicy>,
}

impl<R, H, B> OrderEventHandler<R, H, B>
where
    R: OrderRepository,
    H: OrderHistoryStore,
    B: MessageBus + 'static,
{
    pub fn new(
        service: Arc<OrderService<R, H, B>>,
        guard: Arc<dyn IdempotencyGuard>,
        policy: Arc<dyn PaymentFailurePolicy>,
    ) -> Self {
        Self {
            service,
            guard,
            policy,
        }
    }

    #[tracing::instrument(skip(self, envelope))]
    async fn on_payment_succeeded(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<(), ChoreographyError> {
        let payload: PaymentSucceededPayload = envelope.payload_as()?;
        self.service
            .mark_paid(
                payload.order_id,
                payload.payment_id,
                payload.provider_transaction_id,
                payload.amount,
            )
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, envelope))]
    async fn on_payment_failed(&self, envelope: &EventEnvelope) -> Result<(), ChoreographyError> {
        let payload: PaymentFailedPayload = envelope.payload_as()?;
        self.service
            .record_payment_failure(
                payload.order_id,
                payload.payment_id,
                payload.failure_reason.clone(),
            )
            .await?;

        match self.policy.decide(&payload) {
            FailureAction::RecordOnly => {
                tracing::info!(
                    order_id = %payload.order_id,
                    policy = self.policy.name(),
                    "payment failure recorded, order left retryable"
                );
            }
            FailureAction::CancelOrder { reason } => {
                tracing::warn!(
                    order_id = %payload.order_id,
                    policy = self.policy.name(),
                    %reason,
                    "payment failure cancels order"
                );
                self.service
                    .cancel_order(payload.order_id, reason, self.policy.name().to_string())
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<R, H, B> EventHandler for OrderEventHandler<R, H, B>
where
    R: OrderRepository,
    H: OrderHistoryStore,
    B: MessageBus + 'static,
{
    fn name(&self) -> &'static str {
        CONSUMER_NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if envelope.event_type != event_types::PAYMENT_SUCCEEDED
            && envelope.event_type != event_types::PAYMENT_FAILED
        {
            tracing::debug!(event_type = %envelope.event_type, "ignoring unrelated event");
            return Ok(());
        }

        let key = IdempotencyKey::for_envelope(self.name(), envelope);
        if !self.guard.should_apply(&key).await {
            tracing::debug!(aggregate_id = %envelope.aggregate_id, "already applied, acking duplicate");
            return Ok(());
        }

        let result = if envelope.event_type == event_types::PAYMENT_SUCCEEDED {
            self.on_payment_succeeded(envelope).await
        } else {
            self.on_payment_failed(envelope).await
        };

        match result {
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
