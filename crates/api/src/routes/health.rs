//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use store::CommerceStore;

use crate::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub payments: &'static str,
}

/// GET /health: liveness plus the configured backends.
pub async fn check<S: CommerceStore + 'static>(
    State(state): State<SharedState<S>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        store: state.store_backend,
        payments: state.payment_backend,
    })
}
