//! Saga coordinator for order placement and payment reconciliation.

use std::time::{Duration, Instant};

use common::{OrderId, ProductId, UserId};
use domain::{NewOrder, Order, OrderStatus, PricedLine};
use serde::{Deserialize, Serialize};
use store::{
    CommerceStore, InventoryLedger, ProcessedEvent, ReserveOutcome, StoreTransaction,
    TransitionOutcome,
};

use crate::error::{Result, SagaError};
use crate::events::WebhookEvent;
use crate::order_fulfillment;
use crate::services::payment::{GatewayError, PaymentGateway, PaymentHandle};

/// Default deadline for a single payment authorization.
pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// A requested quantity of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// A persisted order together with the payment handle the client completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub payment: PaymentHandle,
}

/// Why a verified webhook was acknowledged without touching any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnhandledType,
    MissingCorrelation,
    UnknownOrder,
}

/// The result of applying one verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The order moved out of `Pending`.
    Applied {
        order_id: OrderId,
        status: OrderStatus,
    },
    /// The event id was already processed; nothing changed.
    Duplicate { event_id: String },
    /// The order had already left `Pending`; the event was recorded only.
    AlreadySettled {
        order_id: OrderId,
        status: OrderStatus,
    },
    Ignored(IgnoreReason),
}

impl WebhookOutcome {
    /// Short label used in responses and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied { .. } => "applied",
            WebhookOutcome::Duplicate { .. } => "duplicate",
            WebhookOutcome::AlreadySettled { .. } => "already_settled",
            WebhookOutcome::Ignored(IgnoreReason::UnhandledType) => "ignored_event_type",
            WebhookOutcome::Ignored(IgnoreReason::MissingCorrelation) => "ignored_no_correlation",
            WebhookOutcome::Ignored(IgnoreReason::UnknownOrder) => "ignored_unknown_order",
        }
    }
}

/// Orchestrates the order fulfillment saga.
///
/// Placing an order runs three steps: price the lines from the catalog,
/// reserve stock and persist the order in one transaction, then request a
/// payment authorization. Settlement arrives later as a provider webhook,
/// which moves the order out of `Pending` exactly once.
///
/// The coordinator holds no mutable state of its own; every guard against
/// concurrent requests lives in the store.
pub struct SagaCoordinator<S, P>
where
    S: CommerceStore,
    P: PaymentGateway,
{
    store: S,
    payment: P,
    payment_timeout: Duration,
}

impl<S, P> SagaCoordinator<S, P>
where
    S: CommerceStore,
    P: PaymentGateway,
{
    /// Creates a new saga coordinator.
    pub fn new(store: S, payment: P) -> Self {
        Self {
            store,
            payment,
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
        }
    }

    /// Overrides the payment authorization deadline.
    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn payment(&self) -> &P {
        &self.payment
    }

    /// Places an order and obtains a payment authorization for it.
    ///
    /// On any failure before the commit nothing is persisted and no stock
    /// moves. If the payment step fails after the commit, the order stays
    /// `Pending` with its stock reserved and [`SagaError::Gateway`] carries
    /// its id so the client can retry with [`pay_order`](Self::pay_order).
    #[tracing::instrument(skip(self, lines, shipping_address), fields(lines = lines.len()))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        lines: Vec<OrderLine>,
        shipping_address: String,
    ) -> Result<PlacedOrder> {
        let started = Instant::now();
        let result = self.place_order(user_id, lines, shipping_address).await;
        metrics::histogram!("order_creation_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(placed) => {
                tracing::info!(
                    order_id = %placed.order.id,
                    total = %placed.order.total_amount,
                    "order placed"
                );
            }
            // Committed and still Pending; counted under payment_authorizations_total.
            Err(SagaError::Gateway { order_id, .. }) => {
                tracing::info!(%order_id, "order placed, payment pending");
            }
            Err(e) => {
                metrics::counter!("orders_rejected_total", "reason" => e.kind()).increment(1);
                tracing::info!(reason = e.kind(), error = %e, "order rejected");
            }
        }
        result
    }

    async fn place_order(
        &self,
        user_id: UserId,
        lines: Vec<OrderLine>,
        shipping_address: String,
    ) -> Result<PlacedOrder> {
        // 1. Price the lines from the current catalog
        tracing::debug!(step = order_fulfillment::STEP_PRICE_ORDER, "saga step started");
        let requested: Vec<(ProductId, u32)> = lines
            .iter()
            .map(|line| (line.product_id, line.quantity))
            .collect();
        NewOrder::validate_request(&requested, &shipping_address)?;

        let mut priced = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = self
                .store
                .get_product(line.product_id)
                .await?
                .ok_or(SagaError::ProductNotFound(line.product_id))?;
            priced.push(PricedLine::new(product, line.quantity));
        }
        let new_order = NewOrder::price(user_id, shipping_address, &priced)?;

        // 2. Reserve stock and persist the order atomically
        let mut order = self.reserve_and_persist(new_order).await?;
        metrics::counter!("orders_created_total").increment(1);

        // 3. Authorize payment outside the transaction
        let payment = self.authorize_payment(&mut order).await?;
        Ok(PlacedOrder { order, payment })
    }

    #[tracing::instrument(skip(self, new_order), fields(order_id = %new_order.id))]
    async fn reserve_and_persist(&self, new_order: NewOrder) -> Result<Order> {
        tracing::debug!(
            step = order_fulfillment::STEP_RESERVE_AND_PERSIST,
            "saga step started"
        );
        let mut tx = self.store.begin().await?;

        for item in &new_order.items {
            match tx.try_reserve(item.product_id, item.quantity).await? {
                ReserveOutcome::Reserved => {}
                ReserveOutcome::InsufficientStock { available } => {
                    tx.rollback().await?;
                    return Err(SagaError::InsufficientStock {
                        product_id: item.product_id,
                        requested: item.quantity,
                        available,
                    });
                }
                ReserveOutcome::ProductNotFound => {
                    tx.rollback().await?;
                    return Err(SagaError::ProductNotFound(item.product_id));
                }
            }
        }

        let order = tx.create_order(new_order).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Requests an authorization for `order` and records the intent on it.
    async fn authorize_payment(&self, order: &mut Order) -> Result<PaymentHandle> {
        tracing::debug!(
            step = order_fulfillment::STEP_AUTHORIZE_PAYMENT,
            order_id = %order.id,
            "saga step started"
        );
        let authorization = tokio::time::timeout(
            self.payment_timeout,
            self.payment.authorize(order.total_amount, order.id),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout(self.payment_timeout)));

        let handle = match authorization {
            Ok(handle) => {
                metrics::counter!("payment_authorizations_total", "outcome" => "authorized")
                    .increment(1);
                handle
            }
            Err(source) => {
                let outcome = match source {
                    GatewayError::Timeout(_) => "timeout",
                    GatewayError::Rejected(_) => "rejected",
                    GatewayError::Unavailable(_) => "unavailable",
                };
                metrics::counter!("payment_authorizations_total", "outcome" => outcome)
                    .increment(1);
                tracing::warn!(order_id = %order.id, error = %source, "payment authorization failed");
                return Err(SagaError::Gateway {
                    order_id: order.id,
                    source,
                });
            }
        };

        if !self
            .store
            .attach_payment_intent(order.id, &handle.payment_intent_id)
            .await?
        {
            return Err(SagaError::OrderNotFound(order.id));
        }
        order.payment_intent_id = Some(handle.payment_intent_id.clone());
        Ok(handle)
    }

    /// Retries the payment step for an order that is still `Pending`.
    ///
    /// The provider deduplicates by order id, so a retry after a lost
    /// response returns the original intent.
    #[tracing::instrument(skip(self))]
    pub async fn pay_order(&self, order_id: OrderId) -> Result<PlacedOrder> {
        let mut order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Pending {
            return Err(SagaError::InvalidState {
                order_id,
                status: order.status,
            });
        }

        let payment = self.authorize_payment(&mut order).await?;
        Ok(PlacedOrder { order, payment })
    }

    /// Cancels a `Pending` order and gives its stock back.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let mut order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))?;
        if order.status != OrderStatus::Pending {
            return Err(SagaError::InvalidState {
                order_id,
                status: order.status,
            });
        }

        let mut tx = self.store.begin().await?;
        match tx
            .transition_status(order_id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await?
        {
            TransitionOutcome::Updated => {
                for item in &order.items {
                    tx.release(item.product_id, item.quantity).await?;
                }
                tx.commit().await?;
            }
            TransitionOutcome::Conflict { current } => {
                tx.rollback().await?;
                return Err(SagaError::InvalidState {
                    order_id,
                    status: current,
                });
            }
            TransitionOutcome::NotFound => {
                tx.rollback().await?;
                return Err(SagaError::OrderNotFound(order_id));
            }
        }

        tracing::info!(%order_id, "order cancelled");
        order.status = OrderStatus::Cancelled;
        Ok(order)
    }

    /// Verifies and applies one payment provider webhook delivery.
    ///
    /// Signature failures and malformed bodies are errors and never mutate
    /// state. Everything else is acknowledged with a [`WebhookOutcome`];
    /// redeliveries of a processed event id are no-ops.
    #[tracing::instrument(skip_all)]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome> {
        let event = match self.payment.verify_and_parse(payload, signature_header) {
            Ok(event) => event,
            Err(e) => {
                let e = SagaError::from(e);
                tracing::warn!(error = %e, "webhook rejected");
                metrics::counter!("webhook_events_total", "outcome" => e.kind()).increment(1);
                return Err(e);
            }
        };

        let result = self.apply_webhook_event(&event).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(e) => e.kind(),
        };
        metrics::counter!("webhook_events_total", "outcome" => outcome).increment(1);
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            outcome,
            "webhook processed"
        );
        result
    }

    async fn apply_webhook_event(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        tracing::debug!(
            step = order_fulfillment::STEP_APPLY_WEBHOOK,
            event_id = %event.id,
            "saga step started"
        );
        let Some(target) = event.kind.target_status() else {
            return Ok(WebhookOutcome::Ignored(IgnoreReason::UnhandledType));
        };
        let Some(order_id) = event.order_id else {
            return Ok(WebhookOutcome::Ignored(IgnoreReason::MissingCorrelation));
        };
        let Some(order) = self.store.get_order(order_id).await? else {
            tracing::warn!(event_id = %event.id, %order_id, "webhook for unknown order");
            return Ok(WebhookOutcome::Ignored(IgnoreReason::UnknownOrder));
        };
        if self.store.is_event_processed(&event.id).await? {
            return Ok(WebhookOutcome::Duplicate {
                event_id: event.id.clone(),
            });
        }
        if let (Some(expected), Some(actual)) = (&order.payment_intent_id, &event.payment_intent_id) {
            if expected != actual {
                tracing::warn!(%order_id, %expected, %actual, "webhook payment intent differs from recorded one");
            }
        }

        let mut tx = self.store.begin().await?;
        let recorded = tx
            .record_processed_event(&ProcessedEvent {
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                order_id,
            })
            .await?;
        if !recorded {
            tx.rollback().await?;
            return Ok(WebhookOutcome::Duplicate {
                event_id: event.id.clone(),
            });
        }

        let outcome = match tx
            .transition_status(order_id, OrderStatus::Pending, target)
            .await?
        {
            TransitionOutcome::Updated => {
                if target.releases_stock() {
                    for item in &order.items {
                        tx.release(item.product_id, item.quantity).await?;
                    }
                }
                WebhookOutcome::Applied {
                    order_id,
                    status: target,
                }
            }
            TransitionOutcome::Conflict { current } => WebhookOutcome::AlreadySettled {
                order_id,
                status: current,
            },
            TransitionOutcome::NotFound => {
                tx.rollback().await?;
                return Ok(WebhookOutcome::Ignored(IgnoreReason::UnknownOrder));
            }
        };
        tx.commit().await?;
        Ok(outcome)
    }

    /// Loads an order with its items.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.store.get_order(order_id).await?)
    }

    /// Lists a user's orders, newest first.
    pub async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.list_orders_for_user(user_id).await?)
    }

    /// Lists every order, newest first.
    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(self.store.list_orders().await?)
    }
}
