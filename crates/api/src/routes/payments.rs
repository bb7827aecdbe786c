//! Payment read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{Payment, PaymentRepository};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::orders::parse_aggregate_id;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: String,
    pub user_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub method: String,
    pub status: String,
    pub correlation_id: String,
    pub provider_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub retry_count: u32,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        PaymentResponse {
            id: payment.id().to_string(),
            order_id: payment.order_id().to_string(),
            user_id: payment.user_id().as_uuid().to_string(),
            amount_cents: payment.amount().cents(),
            currency: payment.currency().as_str().to_string(),
            method: payment.method().as_str().to_string(),
            status: payment.status().to_string(),
            correlation_id: payment.correlation_id().to_string(),
            provider_transaction_id: payment.provider_transaction_id().map(String::from),
            failure_reason: payment.failure_reason().map(String::from),
            retry_count: payment.retry_count(),
        }
    }
}

/// GET /payments/:id — load a payment by ID.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_aggregate_id(&id)?;
    let payment = state
        .payments
        .find_by_id(payment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Payment {id} not found")))?;

    Ok(Json(PaymentResponse::from(&payment)))
}
