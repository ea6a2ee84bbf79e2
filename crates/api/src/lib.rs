//! HTTP API server with observability for the order fulfillment service.
//!
//! Provides REST endpoints for placing and tracking orders plus the payment
//! provider webhook, with structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use common::ProductId;
use domain::{Money, Product};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryPaymentGateway, PaymentGateway, SagaCoordinator};
use store::{CommerceStore, InMemoryCommerceStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Payment gateway selected at startup.
pub type DynPaymentGateway = Arc<dyn PaymentGateway>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: CommerceStore> {
    pub coordinator: SagaCoordinator<S, DynPaymentGateway>,
    /// Backend names reported by `/health`.
    pub store_backend: &'static str,
    pub payment_backend: &'static str,
}

pub type SharedState<S> = Arc<AppState<S>>;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CommerceStore + 'static>(
    state: SharedState<S>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list_mine::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/pay", post(routes::orders::pay::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/admin/orders", get(routes::orders::list_all::<S>))
        .route("/webhooks/payment", post(routes::webhooks::receive::<S>))
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

/// Wires a store and a payment gateway into the application state.
pub fn create_state<S: CommerceStore + 'static>(
    store: S,
    store_backend: &'static str,
    payment: DynPaymentGateway,
    payment_backend: &'static str,
    payment_timeout: Duration,
) -> SharedState<S> {
    let coordinator = SagaCoordinator::new(store, payment).with_payment_timeout(payment_timeout);
    Arc::new(AppState {
        coordinator,
        store_backend,
        payment_backend,
    })
}

/// Creates the default application state with in-memory store and gateway.
///
/// The store and gateway handles are returned so callers can seed products
/// and sign webhook deliveries.
pub fn create_default_state() -> (
    SharedState<InMemoryCommerceStore>,
    InMemoryCommerceStore,
    InMemoryPaymentGateway,
) {
    let store = InMemoryCommerceStore::new();
    let payment = InMemoryPaymentGateway::default();
    let state = create_state(
        store.clone(),
        "memory",
        Arc::new(payment.clone()),
        "memory",
        saga::DEFAULT_PAYMENT_TIMEOUT,
    );
    (state, store, payment)
}

/// Catalog used when running without a database.
pub fn demo_products() -> Vec<Product> {
    [
        (1, "Espresso Machine", 24999, 10),
        (2, "Burr Grinder", 12950, 25),
        (3, "Milk Frother", 3999, 50),
        (4, "Limited Edition Mug", 1800, 1),
    ]
    .into_iter()
    .map(|(n, name, cents, stock)| {
        Product::new(
            ProductId::from_uuid(Uuid::from_u128(n)),
            name,
            Money::from_cents(cents),
            stock,
        )
    })
    .collect()
}

/// Loads [`demo_products`] into an in-memory store.
pub async fn seed_demo_products(store: &InMemoryCommerceStore) {
    for product in demo_products() {
        tracing::info!(
            product_id = %product.id,
            name = %product.name,
            price = %product.price,
            stock = product.stock_quantity,
            "seeded demo product"
        );
        store.insert_product(product).await;
    }
}
