//! Stripe-backed payment gateway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::Money;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::events::WebhookEvent;
use crate::order_fulfillment::CORRELATION_METADATA_KEY;
use crate::services::payment::{GatewayError, PaymentGateway, PaymentHandle, WebhookError};
use crate::services::signature;

/// Connection settings for the Stripe API.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub currency: String,
    /// HTTP timeout applied to every API request.
    pub timeout: Duration,
    /// Maximum age of a webhook signature timestamp.
    pub webhook_tolerance: Duration,
}

#[derive(Deserialize)]
struct PaymentIntentResponse {
    id: String,
    client_secret: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct PaymentIntentSearch {
    data: Vec<PaymentIntentResponse>,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

/// Maps a non-success Stripe response to a gateway error.
///
/// An idempotency conflict (409) means a request with the same key is still
/// in flight, and 429 is rate limiting: both are worth retrying.
pub(crate) fn classify_status(status: StatusCode, message: String) -> GatewayError {
    if status.is_server_error()
        || status == StatusCode::CONFLICT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        GatewayError::Unavailable(message)
    } else {
        GatewayError::Rejected(message)
    }
}

/// Idempotency key for one creation attempt of an order's payment intent.
fn idempotency_key(order_id: &str, generation: u32) -> String {
    if generation == 0 {
        format!("order-{order_id}")
    } else {
        format!("order-{order_id}-{generation}")
    }
}

/// Payment gateway backed by Stripe payment intents.
///
/// Stripe replays the stored response for a reused idempotency key, server
/// errors included. The key for an order therefore moves to a new generation
/// after a server error, and an intent already created for the order is
/// looked up by metadata before a new one is requested.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    config: StripeConfig,
    key_generations: Arc<Mutex<HashMap<OrderId, u32>>>,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            config,
            key_generations: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base.trim_end_matches('/'))
    }

    fn key_generation(&self, order_id: OrderId) -> u32 {
        self.key_generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&order_id)
            .copied()
            .unwrap_or(0)
    }

    fn rotate_key(&self, order_id: OrderId) {
        *self
            .key_generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(order_id)
            .or_insert(0) += 1;
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        response
            .json::<StripeErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error.message)
            .unwrap_or_else(|| status.to_string())
    }

    /// Finds a live payment intent previously created for `order_id`.
    async fn find_existing(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentIntentResponse>, GatewayError> {
        let query = format!("metadata['{CORRELATION_METADATA_KEY}']:'{order_id}'");
        let response = self
            .client
            .get(self.endpoint("/v1/payment_intents/search"))
            .basic_auth(&self.config.secret_key, None::<&str>)
            .query(&[("query", query.as_str()), ("limit", "10")])
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = Self::error_message(response).await;
            tracing::warn!(%status, %message, "payment intent search failed");
            return Err(classify_status(status, message));
        }

        let found: PaymentIntentSearch = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        Ok(found
            .data
            .into_iter()
            .find(|intent| intent.status.as_deref() != Some("canceled")))
    }

    fn into_handle(
        intent: PaymentIntentResponse,
        amount: Money,
    ) -> Result<PaymentHandle, GatewayError> {
        let client_secret = intent.client_secret.ok_or_else(|| {
            GatewayError::Rejected("payment intent has no client secret".to_string())
        })?;
        Ok(PaymentHandle {
            payment_intent_id: intent.id,
            client_secret,
            amount,
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.config.timeout)
        } else {
            GatewayError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[tracing::instrument(skip(self), fields(amount = %amount))]
    async fn authorize(
        &self,
        amount: Money,
        correlation_id: OrderId,
    ) -> Result<PaymentHandle, GatewayError> {
        let order_id = correlation_id.to_string();
        if let Some(intent) = self.find_existing(&order_id).await? {
            tracing::info!(payment_intent_id = %intent.id, "reusing existing payment intent");
            return Self::into_handle(intent, amount);
        }

        let amount_cents = amount.cents().to_string();
        let metadata_key = format!("metadata[{CORRELATION_METADATA_KEY}]");
        let form = [
            ("amount", amount_cents.as_str()),
            ("currency", self.config.currency.as_str()),
            (metadata_key.as_str(), order_id.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
        ];
        let key = idempotency_key(&order_id, self.key_generation(correlation_id));

        let response = self
            .client
            .post(self.endpoint("/v1/payment_intents"))
            .basic_auth(&self.config.secret_key, None::<&str>)
            .header("Idempotency-Key", key)
            .form(&form)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            if status.is_server_error() {
                self.rotate_key(correlation_id);
            }
            let message = Self::error_message(response).await;
            tracing::warn!(%status, %message, "payment intent creation failed");
            return Err(classify_status(status, message));
        }

        let intent: PaymentIntentResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        self.key_generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&correlation_id);

        tracing::info!(payment_intent_id = %intent.id, "payment intent created");
        Self::into_handle(intent, amount)
    }

    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, WebhookError> {
        signature::verify(
            payload,
            signature_header,
            &self.config.webhook_secret,
            self.config.webhook_tolerance,
            chrono::Utc::now().timestamp(),
        )?;
        WebhookEvent::parse(payload)
    }
}
