//! Saga pattern implementation for order fulfillment.
//!
//! Placing an order runs these steps:
//! 1. Price the requested lines from the catalog
//! 2. Reserve stock and persist the order in one store transaction
//! 3. Request a payment authorization from the provider
//!
//! A failure in steps 1 or 2 leaves no trace. A failure in step 3 leaves a
//! `Pending` order whose payment can be retried. The order settles when the
//! provider delivers a signed webhook, which is verified, deduplicated by
//! event id and applied as a single compare-and-swap on the order status.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod order_fulfillment;
pub mod services;

pub use coordinator::{
    DEFAULT_PAYMENT_TIMEOUT, IgnoreReason, OrderLine, PlacedOrder, SagaCoordinator,
    WebhookOutcome,
};
pub use error::{Result, SagaError};
pub use events::{PaymentEventKind, WebhookEvent};
pub use services::{
    GatewayError, InMemoryPaymentGateway, PaymentGateway, PaymentHandle, StripeConfig,
    StripeGateway, WebhookError,
};
