//! Payment provider webhook events.

use std::collections::HashMap;

use common::OrderId;
use domain::OrderStatus;
use serde::Deserialize;

use crate::order_fulfillment::{
    CORRELATION_METADATA_KEY, EVENT_PAYMENT_CANCELED, EVENT_PAYMENT_FAILED,
    EVENT_PAYMENT_SUCCEEDED,
};
use crate::services::payment::WebhookError;

/// What a provider event means for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded,
    Failed,
    Canceled,
    /// Any event type the saga does not act on.
    Other,
}

impl PaymentEventKind {
    /// Maps a provider event type string.
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            EVENT_PAYMENT_SUCCEEDED => PaymentEventKind::Succeeded,
            EVENT_PAYMENT_FAILED => PaymentEventKind::Failed,
            EVENT_PAYMENT_CANCELED => PaymentEventKind::Canceled,
            _ => PaymentEventKind::Other,
        }
    }

    /// The status a `Pending` order moves to, if the event settles it.
    pub fn target_status(&self) -> Option<OrderStatus> {
        match self {
            PaymentEventKind::Succeeded => Some(OrderStatus::Paid),
            PaymentEventKind::Failed | PaymentEventKind::Canceled => Some(OrderStatus::Failed),
            PaymentEventKind::Other => None,
        }
    }
}

/// A verified webhook event, reduced to the fields the saga needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Provider event id, the deduplication key.
    pub id: String,
    pub event_type: String,
    pub kind: PaymentEventKind,
    pub payment_intent_id: Option<String>,
    /// Correlation id read from the payment intent metadata.
    pub order_id: Option<OrderId>,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: RawObject,
}

#[derive(Deserialize)]
struct RawObject {
    id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl WebhookEvent {
    /// Parses a provider payload. Call only after the signature is verified.
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let order_id = match raw.data.object.metadata.get(CORRELATION_METADATA_KEY) {
            Some(value) => match value.parse() {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(event_id = %raw.id, %value, error = %e, "unparseable order id in event metadata");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            kind: PaymentEventKind::from_event_type(&raw.event_type),
            id: raw.id,
            event_type: raw.event_type,
            payment_intent_id: raw.data.object.id,
            order_id,
        })
    }
}
