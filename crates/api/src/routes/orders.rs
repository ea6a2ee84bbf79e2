//! Order placement, payment retry, cancellation and status endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, ProductId};
use domain::{Order, OrderItem};
use saga::{OrderLine, PaymentHandle, PlacedOrder};
use serde::{Deserialize, Serialize};
use store::CommerceStore;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::{AppState, SharedState};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLineRequest>,
    pub shipping_address: String,
}

#[derive(Deserialize)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub total: String,
    pub shipping_address: String,
    pub payment_intent_id: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub price_at_order_time_cents: i64,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount_cents: i64,
}

#[derive(Serialize)]
pub struct PlacedOrderResponse {
    pub order: OrderResponse,
    pub payment: PaymentResponse,
}

impl From<&OrderItem> for OrderItemResponse {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id.to_string(),
            quantity: item.quantity,
            price_at_order_time_cents: item.price_at_order_time.cents(),
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            status: order.status.to_string(),
            items: order.items.iter().map(OrderItemResponse::from).collect(),
            total_cents: order.total_amount.cents(),
            total: order.total_amount.to_string(),
            shipping_address: order.shipping_address,
            payment_intent_id: order.payment_intent_id,
            created_at: order.created_at.to_rfc3339(),
        }
    }
}

impl From<PaymentHandle> for PaymentResponse {
    fn from(handle: PaymentHandle) -> Self {
        Self {
            payment_intent_id: handle.payment_intent_id,
            client_secret: handle.client_secret,
            amount_cents: handle.amount.cents(),
        }
    }
}

impl From<PlacedOrder> for PlacedOrderResponse {
    fn from(placed: PlacedOrder) -> Self {
        Self {
            order: placed.order.into(),
            payment: placed.payment.into(),
        }
    }
}

// -- Handlers --

/// POST /orders: price, reserve and persist an order, then authorize payment.
#[tracing::instrument(skip(state, req), fields(user_id = %caller.user_id))]
pub async fn create<S: CommerceStore + 'static>(
    State(state): State<SharedState<S>>,
    caller: Caller,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<PlacedOrderResponse>), ApiError> {
    let lines = req
        .items
        .iter()
        .map(|line| {
            let product_id = line
                .product_id
                .parse::<ProductId>()
                .map_err(|e| ApiError::BadRequest(format!("Invalid product_id: {e}")))?;
            Ok(OrderLine::new(product_id, line.quantity))
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let placed = state
        .coordinator
        .create_order(caller.user_id, lines, req.shipping_address)
        .await?;

    Ok((StatusCode::CREATED, Json(placed.into())))
}

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state), fields(user_id = %caller.user_id))]
pub async fn list_mine<S: CommerceStore + 'static>(
    State(state): State<SharedState<S>>,
    caller: Caller,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.coordinator.list_orders_for_user(caller.user_id).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /admin/orders: every order, newest first.
#[tracing::instrument(skip(state), fields(user_id = %caller.user_id))]
pub async fn list_all<S: CommerceStore + 'static>(
    State(state): State<SharedState<S>>,
    caller: Caller,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    caller.ensure_admin()?;
    let orders = state.coordinator.list_orders().await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}: order status, for its owner or an admin.
#[tracing::instrument(skip(state), fields(user_id = %caller.user_id))]
pub async fn get<S: CommerceStore + 'static>(
    State(state): State<SharedState<S>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = load_accessible(&state, &caller, &id).await?;
    Ok(Json(order.into()))
}

/// POST /orders/{id}/pay: retry the payment step of a `PENDING` order. Owner only.
#[tracing::instrument(skip(state), fields(user_id = %caller.user_id))]
pub async fn pay<S: CommerceStore + 'static>(
    State(state): State<SharedState<S>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<PlacedOrderResponse>, ApiError> {
    let order = load_accessible(&state, &caller, &id).await?;
    caller.ensure_owner(&order)?;
    let placed = state.coordinator.pay_order(order.id).await?;
    Ok(Json(placed.into()))
}

/// POST /orders/{id}/cancel: cancel a `PENDING` order and release its stock.
#[tracing::instrument(skip(state), fields(user_id = %caller.user_id))]
pub async fn cancel<S: CommerceStore + 'static>(
    State(state): State<SharedState<S>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = load_accessible(&state, &caller, &id).await?;
    let cancelled = state.coordinator.cancel_order(order.id).await?;
    Ok(Json(cancelled.into()))
}

async fn load_accessible<S: CommerceStore + 'static>(
    state: &AppState<S>,
    caller: &Caller,
    id: &str,
) -> Result<Order, ApiError> {
    let order_id = parse_order_id(id)?;
    let order = state
        .coordinator
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
    caller.ensure_can_access(&order)?;
    Ok(order)
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
