//! Order lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::AggregateId;
use domain::{
    Currency, Money, Order, OrderHistoryEntry, OrderItem, PaymentMethod, ProductId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::payments::PaymentResponse;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: Option<String>,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub currency: Currency,
    pub method: PaymentMethod,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub reason: String,
    pub cancelled_by: String,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub correlation_id: String,
    pub payment_reference: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        let items = order
            .items()
            .iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id.as_str().to_string(),
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price.cents(),
            })
            .collect();

        OrderResponse {
            id: order.id().to_string(),
            user_id: order.user_id().as_uuid().to_string(),
            status: order.status().to_string(),
            items,
            total_cents: order.total().cents(),
            correlation_id: order.correlation_id().to_string(),
            payment_reference: order.payment_reference().map(String::from),
        }
    }
}

// -- Handlers --

/// POST /orders — create a new order in `pending`.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let user_id = match req.user_id {
        Some(ref raw) => {
            let uuid = uuid::Uuid::parse_str(raw)
                .map_err(|e| ApiError::BadRequest(format!("Invalid userId: {e}")))?;
            UserId::from_uuid(uuid)
        }
        None => UserId::new(),
    };

    let items: Vec<OrderItem> = req
        .items
        .iter()
        .map(|item| {
            OrderItem::new(
                ProductId::new(item.product_id.as_str()),
                item.product_name.as_str(),
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();

    let order = state.service.create_order(user_id, items).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/:id — load an order by ID.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state
        .service
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/place — place the order and kick off payment.
#[tracing::instrument(skip(state, req))]
pub async fn place(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state
        .service
        .place_order(order_id, req.currency, req.method)
        .await?;

    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/ship — mark a paid order as shipped.
#[tracing::instrument(skip(state))]
pub async fn ship(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.service.ship_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/complete — close out a shipped order.
#[tracing::instrument(skip(state))]
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.service.complete_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/cancel — cancel a non-terminal order.
#[tracing::instrument(skip(state, req))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state
        .service
        .cancel_order(order_id, req.reason, req.cancelled_by)
        .await?;

    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/:id/history — audit trail of status changes, oldest first.
#[tracing::instrument(skip(state))]
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OrderHistoryEntry>>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    if state.service.get_order(order_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Order {id} not found")));
    }

    Ok(Json(state.service.get_history(order_id).await?))
}

/// GET /orders/:id/payments — payment attempts recorded for the order.
#[tracing::instrument(skip(state))]
pub async fn payments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PaymentResponse>>, ApiError> {
    use domain::PaymentRepository;

    let order_id = parse_aggregate_id(&id)?;
    if state.service.get_order(order_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Order {id} not found")));
    }

    let payments = state.payments.find_by_order_id(order_id).await?;
    Ok(Json(payments.iter().map(PaymentResponse::from).collect()))
}

pub(crate) fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(AggregateId::from(uuid))
}
