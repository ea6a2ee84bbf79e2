//! Payment provider webhook endpoint.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use saga::services::signature::SIGNATURE_HEADER;
use serde::Serialize;
use store::CommerceStore;

use crate::SharedState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: &'static str,
}

/// POST /webhooks/payment: verify and apply a provider event.
///
/// The body is taken as raw bytes; the signature covers them exactly.
/// Any verified event is acknowledged with 200 so the provider stops
/// redelivering, including duplicates and events for unknown orders.
pub async fn receive<S: CommerceStore + 'static>(
    State(state): State<SharedState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let outcome = state.coordinator.handle_webhook(&body, signature).await?;

    Ok(Json(WebhookResponse {
        received: true,
        outcome: outcome.as_str(),
    }))
}
