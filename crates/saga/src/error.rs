//! Saga error types.

use common::{OrderId, ProductId};
use domain::{OrderError, OrderStatus};
use store::StoreError;
use thiserror::Error;

use crate::services::payment::{GatewayError, WebhookError};

/// Errors that can occur during saga operations.
///
/// Every variant is scoped to one request; none is fatal to the process.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request shape or quantities are invalid.
    #[error("Validation error: {0}")]
    Validation(#[from] OrderError),

    /// A requested product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Not enough stock to reserve the requested quantity.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: i64,
    },

    /// The order is not in a state that allows the operation.
    #[error("Order {order_id} is {status}")]
    InvalidState {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// The payment provider was unreachable, timed out or refused.
    ///
    /// The order stays `Pending`; the payment step can be retried.
    #[error("Payment gateway error for order {order_id}: {source}")]
    Gateway {
        order_id: OrderId,
        #[source]
        source: GatewayError,
    },

    /// A webhook delivery failed verification or could not be parsed.
    #[error("Webhook rejected: {0}")]
    Webhook(#[from] WebhookError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SagaError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SagaError::Validation(_) => "validation",
            SagaError::ProductNotFound(_) | SagaError::OrderNotFound(_) => "not_found",
            SagaError::InsufficientStock { .. } => "insufficient_stock",
            SagaError::InvalidState { .. } => "invalid_state",
            SagaError::Gateway { .. } => "gateway",
            SagaError::Webhook(WebhookError::InvalidSignature(_)) => "signature",
            SagaError::Webhook(WebhookError::MalformedPayload(_)) => "malformed_payload",
            SagaError::Store(_) => "store",
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
