//! Payment processor capability: trait and simulated implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use common::AggregateId;
use domain::{Currency, Money, PaymentMethod};

use crate::error::ChoreographyError;

/// A charge request handed to the provider.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub amount: Money,
    pub currency: Currency,
    pub method: PaymentMethod,
}

/// The provider's answer to a charge request.
#[derive(Debug, Clone)]
pub enum ProcessorOutcome {
    /// The charge settled.
    Approved {
        provider_transaction_id: String,
        provider_response: String,
    },

    /// The provider rejected the charge.
    Declined { failure_reason: String },
}

/// External payment-processing capability.
///
/// An `Err` is a transport-level problem (provider unreachable); a
/// decline is a successful call with a [`ProcessorOutcome::Declined`]
/// answer.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn process(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProcessorOutcome, ChoreographyError>;
}

#[derive(Debug, Default)]
struct SimulatedState {
    charges: HashMap<String, (AggregateId, Money)>,
    next_id: u32,
    decline_reason: Option<String>,
    transport_error: Option<String>,
}

/// Simulated payment processor with randomized latency.
///
/// Approves everything by default; tests flip the decline or
/// transport-error knobs to exercise the failure paths.
#[derive(Debug, Clone)]
pub struct SimulatedPaymentProcessor {
    state: Arc<RwLock<SimulatedState>>,
    max_latency: Duration,
}

impl Default for SimulatedPaymentProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPaymentProcessor {
    /// Creates a processor with up to 25ms of simulated latency.
    pub fn new() -> Self {
        Self::with_max_latency(Duration::from_millis(25))
    }

    /// Creates a processor with a latency bound (0 disables the sleep).
    pub fn with_max_latency(max_latency: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(SimulatedState::default())),
            max_latency,
        }
    }

    /// Declines every charge with the given reason until cleared.
    pub fn set_decline(&self, reason: Option<&str>) {
        self.state.write().unwrap().decline_reason = reason.map(str::to_string);
    }

    /// Fails every call at the transport level until cleared.
    pub fn set_transport_error(&self, error: Option<&str>) {
        self.state.write().unwrap().transport_error = error.map(str::to_string);
    }

    /// Number of settled charges.
    pub fn charge_count(&self) -> usize {
        self.state.read().unwrap().charges.len()
    }

    /// Returns true if a charge settled under the given reference.
    pub fn has_charge(&self, provider_transaction_id: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .charges
            .contains_key(provider_transaction_id)
    }
}

#[async_trait]
impl PaymentProcessor for SimulatedPaymentProcessor {
    async fn process(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProcessorOutcome, ChoreographyError> {
        if !self.max_latency.is_zero() {
            let millis = rand::thread_rng().gen_range(0..=self.max_latency.as_millis() as u64);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        let mut state = self.state.write().unwrap();

        if let Some(error) = &state.transport_error {
            return Err(ChoreographyError::Processor(error.clone()));
        }
        if let Some(reason) = &state.decline_reason {
            return Ok(ProcessorOutcome::Declined {
                failure_reason: reason.clone(),
            });
        }

        state.next_id += 1;
        let provider_transaction_id = format!("tx-{:04}", state.next_id);
        state
            .charges
            .insert(provider_transaction_id.clone(), (request.payment_id, request.amount));

        Ok(ProcessorOutcome::Approved {
            provider_transaction_id,
            provider_response: format!(
                "approved {} {}",
                request.amount,
                request.currency
            ),
        })
    }
}
