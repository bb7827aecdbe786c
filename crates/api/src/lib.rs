//! HTTP surface for the order/payment choreography.
//!
//! Exposes REST endpoints for the order lifecycle and read access to
//! payments, with structured logging (tracing) and Prometheus metrics.
//! `create_default_state` wires the in-memory broker, the order
//! service, and the four consuming services behind the router.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use choreography::{
    CancelAfterAttempts, InMemoryIdempotencyGuard, InMemoryStockStore, InventoryEventHandler,
    NotificationEventHandler, OrderEventHandler, PaymentEventHandler, PaymentFailurePolicy,
    RecordOnly, SimulatedNotificationProvider, SimulatedPaymentProcessor,
};
use domain::{InMemoryOrderHistory, InMemoryOrderRepository, InMemoryPaymentRepository, OrderService};
use messaging::{Consumer, ConsumerConfig, InMemoryBroker, MessagingError, ReliablePublisher};

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub service: Arc<OrderService<InMemoryOrderRepository, InMemoryOrderHistory, InMemoryBroker>>,
    pub payments: Arc<InMemoryPaymentRepository>,
    pub broker: InMemoryBroker,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/place", post(routes::orders::place))
        .route("/orders/{id}/ship", post(routes::orders::ship))
        .route("/orders/{id}/complete", post(routes::orders::complete))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/orders/{id}/history", get(routes::orders::history))
        .route("/orders/{id}/payments", get(routes::orders::payments))
        .route("/payments/{id}", get(routes::payments::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the broker, the order service, and the consuming services.
///
/// Each consumer gets its own queue, idempotency guard, and handler;
/// all of them share the returned shutdown channel. Dropping the
/// sender (or sending `true`) stops every consumer loop.
pub async fn create_default_state(
    config: &Config,
) -> Result<(Arc<AppState>, watch::Sender<bool>), MessagingError> {
    let broker = InMemoryBroker::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let service = Arc::new(OrderService::new(
        Arc::new(InMemoryOrderRepository::new()),
        Arc::new(InMemoryOrderHistory::new()),
        ReliablePublisher::new(Arc::new(broker.clone())),
    ));
    let payments = Arc::new(InMemoryPaymentRepository::new());

    let consumer_config = |queue: &str| {
        ConsumerConfig::new(queue)
            .prefetch(config.prefetch)
            .max_retries(config.max_retries)
            .retry_delay(config.retry_delay)
    };

    let payment_handler = PaymentEventHandler::with_timeout(
        Arc::clone(&payments),
        Arc::new(SimulatedPaymentProcessor::new()),
        ReliablePublisher::new(Arc::new(broker.clone())),
        Arc::new(InMemoryIdempotencyGuard::new()),
        config.processor_timeout,
    );
    Consumer::bind(
        broker.clone(),
        Arc::new(payment_handler),
        consumer_config("payment-service"),
        &["order.created"],
    )
    .await?
    .spawn(shutdown_rx.clone());

    let policy: Arc<dyn PaymentFailurePolicy> = match config.cancel_after_attempts {
        Some(max_attempts) => Arc::new(CancelAfterAttempts { max_attempts }),
        None => Arc::new(RecordOnly),
    };
    Consumer::bind(
        broker.clone(),
        Arc::new(OrderEventHandler::new(
            Arc::clone(&service),
            Arc::new(InMemoryIdempotencyGuard::new()),
            policy,
        )),
        consumer_config("order-service"),
        &["payment.*"],
    )
    .await?
    .spawn(shutdown_rx.clone());

    Consumer::bind(
        broker.clone(),
        Arc::new(NotificationEventHandler::new(
            Arc::new(SimulatedNotificationProvider::new()),
            Arc::new(InMemoryIdempotencyGuard::new()),
        )),
        consumer_config("notification-service"),
        &["order.paid", "payment.failed"],
    )
    .await?
    .spawn(shutdown_rx.clone());

    Consumer::bind(
        broker.clone(),
        Arc::new(InventoryEventHandler::new(
            Arc::new(InMemoryStockStore::new()),
            Arc::new(InMemoryIdempotencyGuard::new()),
        )),
        consumer_config("product-service"),
        &["inventory.updated"],
    )
    .await?
    .spawn(shutdown_rx);

    let state = Arc::new(AppState {
        service,
        payments,
        broker,
    });

    Ok((state, shutdown_tx))
}
