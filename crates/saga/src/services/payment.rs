//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::Money;
use serde::Serialize;
use thiserror::Error;

use crate::events::WebhookEvent;
use crate::order_fulfillment::CORRELATION_METADATA_KEY;
use crate::services::signature;

/// A client-usable handle for completing payment with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentHandle {
    /// The provider's payment intent id.
    pub payment_intent_id: String,
    /// Opaque secret the client uses to confirm the payment.
    pub client_secret: String,
    pub amount: Money,
}

/// Errors returned by [`PaymentGateway::authorize`].
///
/// All of them are retryable with the same correlation id.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The provider could not be reached.
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered with an error.
    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),

    /// The provider did not answer within the deadline.
    #[error("Payment provider timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors returned by [`PaymentGateway::verify_and_parse`].
#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    /// The delivery is not authentic. Never mutates state.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// The delivery is authentic but its body is not a recognizable event.
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),
}

/// Trait for payment provider operations.
///
/// Implementations own every provider-specific request and response shape;
/// the coordinator only sees this contract.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Requests an authorization of `amount`, tagged with `correlation_id`.
    ///
    /// Retrying with the same correlation id must not create a second charge.
    async fn authorize(
        &self,
        amount: Money,
        correlation_id: OrderId,
    ) -> Result<PaymentHandle, GatewayError>;

    /// Verifies the signature of a raw delivery and then parses it.
    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, WebhookError>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn authorize(
        &self,
        amount: Money,
        correlation_id: OrderId,
    ) -> Result<PaymentHandle, GatewayError> {
        (**self).authorize(amount, correlation_id).await
    }

    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, WebhookError> {
        (**self).verify_and_parse(payload, signature_header)
    }
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    intents: HashMap<OrderId, PaymentHandle>,
    next_id: u32,
    authorize_calls: u32,
    fail_on_authorize: bool,
    authorize_delay: Option<Duration>,
}

/// In-memory payment gateway for testing.
///
/// Authorizations are idempotent per correlation id, like the real
/// provider with an idempotency key. Webhooks are verified with the same
/// HMAC scheme as [`StripeGateway`](crate::services::StripeGateway).
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryPaymentState>>,
    webhook_secret: String,
    tolerance: Duration,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new("whsec_in_memory")
    }
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway verifying webhooks with `webhook_secret`.
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            state: Arc::default(),
            webhook_secret: webhook_secret.into(),
            tolerance: Duration::from_secs(300),
        }
    }

    /// Configures the gateway to fail every authorize call.
    pub fn set_fail_on_authorize(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_authorize = fail;
    }

    /// Makes every authorize call wait before answering.
    pub fn set_authorize_delay(&self, delay: Option<Duration>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .authorize_delay = delay;
    }

    /// Returns the number of distinct payment intents created.
    pub fn intent_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .intents
            .len()
    }

    /// Returns how many times authorize was called, including failures.
    pub fn authorize_calls(&self) -> u32 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .authorize_calls
    }

    /// Returns the intent created for an order, if any.
    pub fn intent_for(&self, order_id: OrderId) -> Option<PaymentHandle> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .intents
            .get(&order_id)
            .cloned()
    }

    /// Builds a provider-shaped event body and a valid signature header for it.
    pub fn signed_event(
        &self,
        event_id: &str,
        event_type: &str,
        order_id: Option<OrderId>,
    ) -> Result<(Vec<u8>, String), WebhookError> {
        let metadata = match order_id {
            Some(id) => serde_json::json!({ CORRELATION_METADATA_KEY: id.to_string() }),
            None => serde_json::json!({}),
        };
        let payment_intent_id = order_id
            .and_then(|id| self.intent_for(id))
            .map(|handle| handle.payment_intent_id);
        let payload = serde_json::json!({
            "id": event_id,
            "type": event_type,
            "data": { "object": { "id": payment_intent_id, "metadata": metadata } }
        })
        .to_string()
        .into_bytes();
        let header = signature::sign(
            &payload,
            &self.webhook_secret,
            chrono::Utc::now().timestamp(),
        )?;
        Ok((payload, header))
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn authorize(
        &self,
        amount: Money,
        correlation_id: OrderId,
    ) -> Result<PaymentHandle, GatewayError> {
        let delay = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.authorize_calls += 1;
            state.authorize_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_authorize {
            return Err(GatewayError::Unavailable(
                "Payment provider unreachable".to_string(),
            ));
        }
        if let Some(existing) = state.intents.get(&correlation_id) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let payment_intent_id = format!("pi_{:04}", state.next_id);
        let handle = PaymentHandle {
            client_secret: format!("{payment_intent_id}_secret"),
            payment_intent_id,
            amount,
        };
        state.intents.insert(correlation_id, handle.clone());
        Ok(handle)
    }

    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, WebhookError> {
        signature::verify(
            payload,
            signature_header,
            &self.webhook_secret,
            self.tolerance,
            chrono::Utc::now().timestamp(),
        )?;
        WebhookEvent::parse(payload)
    }
}
