//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics: order, payment and webhook counters in text exposition format.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_TEXT_FORMAT)], handle.render())
}

/// Registers help text for the saga metrics. Call once after installing the recorder.
pub fn describe() {
    metrics::describe_counter!("orders_created_total", "Orders committed with stock reserved");
    metrics::describe_counter!(
        "orders_rejected_total",
        "Order placements rejected before commit, by reason"
    );
    metrics::describe_counter!(
        "payment_authorizations_total",
        "Payment authorization attempts, by outcome"
    );
    metrics::describe_counter!(
        "webhook_events_total",
        "Payment provider webhook deliveries, by outcome"
    );
    metrics::describe_histogram!(
        "order_creation_duration_seconds",
        metrics::Unit::Seconds,
        "Time to place an order including payment authorization"
    );
}
