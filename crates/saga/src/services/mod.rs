//! Payment provider adapters used by the saga.

pub mod payment;
pub mod signature;
pub mod stripe;

pub use payment::{
    GatewayError, InMemoryPaymentGateway, PaymentGateway, PaymentHandle, WebhookError,
};
pub use stripe::{StripeConfig, StripeGateway};
