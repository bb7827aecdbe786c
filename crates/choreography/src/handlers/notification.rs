//! Notification-service coordinator: tells the user about asynchronous
//! payment outcomes.

use std::sync::Arc;

use async_trait::async_trait;

use common::CorrelationId;
use domain::{OrderPaidPayload, PaymentFailedPayload, UserId, event_types};
use messaging::{EventEnvelope, EventHandler, HandlerError};

use crate::error::ChoreographyError;
use crate::idempotency::{IdempotencyGuard, IdempotencyKey};
use crate::services::{Notification, NotificationChannel, NotificationProvider};

const CONSUMER_NAME: &str = "notification-service";

/// Coordinator step for `order.paid` and `payment.failed`.
///
/// Each event fans out into an email to the user and a webhook leg;
/// the webhook leg derives its correlation id with a `.webhook` suffix
/// so the branch is traceable back to the originating chain.
pub struct NotificationEventHandler<N: NotificationProvider> {
    provider: Arc<N>,
    guard: Arc<dyn IdempotencyGuard>,
}

impl<N: NotificationProvider> NotificationEventHandler<N> {
    pub fn new(provider: Arc<N>, guard: Arc<dyn IdempotencyGuard>) -> Self {
        Self { provider, guard }
    }

    #[tracing::instrument(skip(self, envelope))]
    async fn notify(&self, envelope: &EventEnvelope) -> Result<(), ChoreographyError> {
        let correlation = envelope
            .correlation_id
            .clone()
            .unwrap_or_else(CorrelationId::new);

        let (recipient, subject, body) = match envelope.event_type.as_str() {
            event_types::ORDER_PAID => {
                let payload: OrderPaidPayload = envelope.payload_as()?;
                (
                    payload.user_id,
                    "Payment received".to_string(),
                    format!(
                        "Your payment of {} for order {} was received.",
                        payload.amount, payload.order_id
                    ),
                )
            }
            _ => {
                let payload: PaymentFailedPayload = envelope.payload_as()?;
                (
                    payload.user_id,
                    "Payment failed".to_string(),
                    format!(
                        "Payment for order {} failed: {}. You can retry from your orders page.",
                        payload.order_id, payload.failure_reason
                    ),
                )
            }
        };

        self.send(recipient, &subject, &body, NotificationChannel::Email, correlation.clone())
            .await?;
        self.send(
            recipient,
            &subject,
            &body,
            NotificationChannel::Webhook,
            correlation.branch("webhook"),
        )
        .await?;

        metrics::counter!("notifications_sent_total").increment(2);
        Ok(())
    }

    async fn send(
        &self,
        recipient: UserId,
        subject: &str,
        body: &str,
        channel: NotificationChannel,
        correlation_id: CorrelationId,
    ) -> Result<(), ChoreographyError> {
        let receipt = self
            .provider
            .send(Notification {
                recipient,
                channel,
                subject: subject.to_string(),
                body: body.to_string(),
                correlation_id,
            })
            .await?;
        tracing::debug!(message_id = %receipt.message_id, ?channel, "notification accepted");
        Ok(())
    }
}

#[async_trait]
impl<N: NotificationProvider> EventHandler for NotificationEventHandler<N> {
    fn name(&self) -> &'static str {
        CONSUMER_NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if envelope.event_type != event_types::ORDER_PAID
            && envelope.event_type != event_types::PAYMENT_FAILED
        {
            return Ok(());
        }

        let key = IdempotencyKey::for_envelope(self.name(), envelope);
        if !self.guard.should_apply(&key).await {
            return Ok(());
        }

        match self.notify(envelope).await {
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
