//! Order fulfillment saga constants.

/// Step name: Price the requested lines from the catalog.
pub const STEP_PRICE_ORDER: &str = "price_order";

/// Step name: Reserve stock and persist the order in one transaction.
pub const STEP_RESERVE_AND_PERSIST: &str = "reserve_and_persist";

/// Step name: Obtain a payment authorization from the provider.
pub const STEP_AUTHORIZE_PAYMENT: &str = "authorize_payment";

/// Step name: Apply a provider webhook to the order status.
pub const STEP_APPLY_WEBHOOK: &str = "apply_webhook";

/// Provider event: the payment intent succeeded.
pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";

/// Provider event: the payment attempt failed.
pub const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// Provider event: the payment intent was cancelled.
pub const EVENT_PAYMENT_CANCELED: &str = "payment_intent.canceled";

/// Metadata key carrying the order id on the provider's payment intent.
pub const CORRELATION_METADATA_KEY: &str = "order_id";
