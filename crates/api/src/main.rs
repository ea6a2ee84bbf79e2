//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::DynPaymentGateway;
use saga::{InMemoryPaymentGateway, StripeGateway};
use store::{InMemoryCommerceStore, PostgresCommerceStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    api::routes::metrics::describe();

    // 3. Select the payment gateway
    let stripe = config.payment.stripe();
    let payment_backend = if stripe.is_some() { "stripe" } else { "memory" };
    let payment: DynPaymentGateway = match stripe {
        Some(stripe) => {
            Arc::new(StripeGateway::new(stripe).expect("failed to build payment client"))
        }
        None => {
            tracing::warn!("PAYMENT_SECRET_KEY not set, using in-memory payment gateway");
            Arc::new(InMemoryPaymentGateway::new(
                config.payment.webhook_secret.clone(),
            ))
        }
    };

    // 4. Select the store and build the application
    let app = match &config.database_url {
        Some(database_url) => {
            let store =
                PostgresCommerceStore::connect(database_url, config.database_max_connections)
                    .await
                    .expect("failed to connect to database");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            let state = api::create_state(
                store,
                "postgres",
                payment,
                payment_backend,
                config.payment.timeout,
            );
            api::create_app(state, metrics_handle)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store with demo products");
            let store = InMemoryCommerceStore::new();
            api::seed_demo_products(&store).await;
            let state = api::create_state(
                store,
                "memory",
                payment,
                payment_backend,
                config.payment.timeout,
            );
            api::create_app(state, metrics_handle)
        }
    };

    // 5. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
