//! Payment aggregate root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{AggregateId, CorrelationId};

use super::PaymentError;
use super::state::PaymentStatus;
use crate::order::{Currency, Money, PaymentMethod, UserId};

/// One payment attempt for an order, the aggregate root of the payment
/// service.
///
/// Amount, order and user are fixed at creation. Like [`Order`],
/// payments are immutable values; every operation consumes `self` and
/// returns a new instance, and every status change goes through
/// [`PaymentStatus::transition`].
///
/// [`Order`]: crate::order::Order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    id: AggregateId,
    order_id: AggregateId,
    user_id: UserId,
    amount: Money,
    currency: Currency,
    method: PaymentMethod,
    status: PaymentStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    correlation_id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    retry_count: u32,
}

impl Payment {
    /// Creates a new payment in `pending`. The amount must be positive.
    pub fn create(
        order_id: AggregateId,
        user_id: UserId,
        amount: Money,
        currency: Currency,
        method: PaymentMethod,
        correlation_id: CorrelationId,
    ) -> Result<Self, PaymentError> {
        if !amount.is_positive() {
            return Err(PaymentError::NonPositiveAmount {
                cents: amount.cents(),
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: AggregateId::new(),
            order_id,
            user_id,
            amount,
            currency,
            method,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
            correlation_id,
            provider_transaction_id: None,
            provider_response: None,
            failure_reason: None,
            retry_count: 0,
        })
    }

    // Accessors

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn order_id(&self) -> AggregateId {
        self.order_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn provider_transaction_id(&self) -> Option<&str> {
        self.provider_transaction_id.as_deref()
    }

    pub fn provider_response(&self) -> Option<&str> {
        self.provider_response.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    // Status transitions

    /// Hands the payment to the provider: `pending -> processing`.
    ///
    /// The provider transaction reference may already be known (e.g.
    /// from a pre-authorization) or arrive later with the outcome.
    pub fn mark_processing(
        self,
        provider_transaction_id: Option<String>,
    ) -> Result<Self, PaymentError> {
        let next = self.with_status(PaymentStatus::Processing)?;
        Ok(Self {
            provider_transaction_id: provider_transaction_id
                .or(next.provider_transaction_id.clone()),
            ..next
        })
    }

    /// Settles the payment: `processing -> succeeded`.
    ///
    /// A non-empty provider transaction reference must be present after
    /// applying, either carried here or set by [`mark_processing`].
    ///
    /// [`mark_processing`]: Payment::mark_processing
    pub fn mark_succeeded(
        self,
        provider_transaction_id: Option<String>,
        provider_response: Option<String>,
    ) -> Result<Self, PaymentError> {
        let reference = provider_transaction_id
            .or(self.provider_transaction_id.clone())
            .filter(|r| !r.is_empty())
            .ok_or(PaymentError::MissingProviderReference)?;

        let next = self.with_status(PaymentStatus::Succeeded)?;
        Ok(Self {
            provider_transaction_id: Some(reference),
            provider_response,
            ..next
        })
    }

    /// Records a provider rejection or error: `processing -> failed`.
    pub fn mark_failed(self, reason: impl Into<String>) -> Result<Self, PaymentError> {
        let next = self.with_status(PaymentStatus::Failed)?;
        Ok(Self {
            failure_reason: Some(reason.into()),
            ..next
        })
    }

    /// Starts a fresh attempt: `failed -> pending`, bumping the retry
    /// count and clearing the previous attempt's provider fields.
    pub fn retry(self) -> Result<Self, PaymentError> {
        let retry_count = self.retry_count + 1;
        let next = self.with_status(PaymentStatus::Pending)?;
        Ok(Self {
            retry_count,
            provider_transaction_id: None,
            provider_response: None,
            failure_reason: None,
            ..next
        })
    }

    /// Abandons the payment from `pending` or `processing`.
    pub fn cancel(self) -> Result<Self, PaymentError> {
        self.with_status(PaymentStatus::Cancelled)
    }

    fn with_status(self, target: PaymentStatus) -> Result<Self, PaymentError> {
        let status = self.status.transition(target)?;
        Ok(Self {
            status,
            updated_at: Utc::now(),
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_payment() -> Payment {
        Payment::create(
            AggregateId::new(),
            UserId::new(),
            Money::from_dollars(100),
            Currency::Usd,
            PaymentMethod::Card,
            CorrelationId::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_starts_pending() {
        let payment = new_payment();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert_eq!(payment.amount().cents(), 10_000);
        assert_eq!(payment.retry_count(), 0);
    }

    #[test]
    fn test_create_rejects_non_positive_amount() {
        let result = Payment::create(
            AggregateId::new(),
            UserId::new(),
            Money::zero(),
            Currency::Usd,
            PaymentMethod::Card,
            CorrelationId::new(),
        );
        assert!(matches!(
            result,
            Err(PaymentError::NonPositiveAmount { cents: 0 })
        ));
    }

    #[test]
    fn test_processing_then_succeeded_then_terminal() {
        let payment = new_payment()
            .mark_processing(Some("tx-1".to_string()))
            .unwrap();
        assert_eq!(payment.status(), PaymentStatus::Processing);
        assert_eq!(payment.provider_transaction_id(), Some("tx-1"));

        let payment = payment.mark_succeeded(None, None).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Succeeded);
        assert_eq!(payment.provider_transaction_id(), Some("tx-1"));

        // Terminal: any further change is rejected.
        assert!(matches!(
            payment.mark_failed("too late"),
            Err(PaymentError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_succeeded_requires_provider_reference() {
        let payment = new_payment().mark_processing(None).unwrap();
        let err = payment.mark_succeeded(None, None).unwrap_err();
        assert!(matches!(err, PaymentError::MissingProviderReference));
    }

    #[test]
    fn test_succeeded_accepts_reference_with_outcome() {
        let payment = new_payment().mark_processing(None).unwrap();
        let payment = payment
            .mark_succeeded(Some("tx-9".to_string()), Some("approved".to_string()))
            .unwrap();
        assert_eq!(payment.provider_transaction_id(), Some("tx-9"));
        assert_eq!(payment.provider_response(), Some("approved"));
    }

    #[test]
    fn test_failed_then_retry_resets_attempt() {
        let payment = new_payment()
            .mark_processing(Some("tx-1".to_string()))
            .unwrap()
            .mark_failed("card declined")
            .unwrap();
        assert_eq!(payment.status(), PaymentStatus::Failed);
        assert_eq!(payment.failure_reason(), Some("card declined"));

        let payment = payment.retry().unwrap();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert_eq!(payment.retry_count(), 1);
        assert!(payment.provider_transaction_id().is_none());
        assert!(payment.failure_reason().is_none());
    }

    #[test]
    fn test_cannot_succeed_from_pending() {
        let payment = new_payment();
        let err = payment
            .mark_succeeded(Some("tx-1".to_string()), None)
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransition(_)));
    }

    #[test]
    fn test_cancel_from_processing() {
        let payment = new_payment()
            .mark_processing(None)
            .unwrap()
            .cancel()
            .unwrap();
        assert_eq!(payment.status(), PaymentStatus::Cancelled);
        assert!(matches!(
            payment.retry(),
            Err(PaymentError::InvalidTransition(_))
        ));
    }
}
