//! Persisted order records and new-order pricing.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderStatus};
use crate::product::Product;

/// A line item of a persisted order.
///
/// Created once with its parent order and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price captured when the order was placed.
    pub price_at_order_time: Money,
}

impl OrderItem {
    /// Returns `quantity * price_at_order_time`.
    pub fn line_total(&self) -> Money {
        self.price_at_order_time.saturating_multiply(self.quantity)
    }
}

/// A persisted order with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    /// Sum of the line totals at creation time; never recomputed.
    pub total_amount: Money,
    pub status: OrderStatus,
    pub shipping_address: String,
    /// Provider payment intent associated with the order, once authorised.
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Sums the line items using their frozen unit prices.
    pub fn items_total(&self) -> Money {
        self.items.iter().map(OrderItem::line_total).sum()
    }

    /// Returns true if `user_id` placed this order.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

/// A requested quantity of a product, joined with the catalog's current record.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product: Product,
    pub quantity: u32,
}

impl PricedLine {
    pub fn new(product: Product, quantity: u32) -> Self {
        Self { product, quantity }
    }
}

/// A line item about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price_at_order_time: Money,
}

/// An order that has been priced but not yet persisted.
///
/// Built by [`NewOrder::price`], which is the only place the total is
/// computed, so the stored total always equals the sum of its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub shipping_address: String,
    pub items: Vec<NewOrderItem>,
    pub total_amount: Money,
}

impl NewOrder {
    /// Checks request shape before any catalog lookups happen.
    pub fn validate_request(
        lines: &[(ProductId, u32)],
        shipping_address: &str,
    ) -> Result<(), OrderError> {
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }
        if shipping_address.trim().is_empty() {
            return Err(OrderError::ShippingAddressRequired);
        }
        if let Some((product_id, quantity)) = lines.iter().find(|(_, quantity)| *quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: *product_id,
                quantity: *quantity,
            });
        }
        Ok(())
    }

    /// Freezes current catalog prices into line items and computes the total.
    pub fn price(
        user_id: UserId,
        shipping_address: impl Into<String>,
        lines: &[PricedLine],
    ) -> Result<Self, OrderError> {
        let shipping_address = shipping_address.into();
        let requested: Vec<(ProductId, u32)> = lines
            .iter()
            .map(|line| (line.product.id, line.quantity))
            .collect();
        Self::validate_request(&requested, &shipping_address)?;

        let mut total_amount = Money::zero();
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let price = line.product.price;
            if price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: line.product.id,
                    price,
                });
            }
            let line_total = price
                .checked_multiply(line.quantity)
                .ok_or(OrderError::AmountOverflow)?;
            total_amount = total_amount
                .checked_add(line_total)
                .ok_or(OrderError::AmountOverflow)?;
            items.push(NewOrderItem {
                product_id: line.product.id,
                quantity: line.quantity,
                price_at_order_time: price,
            });
        }

        Ok(Self {
            id: OrderId::new(),
            user_id,
            shipping_address,
            items,
            total_amount,
        })
    }

    /// Turns the priced order into its stored `Pending` form.
    pub fn into_order(self, created_at: DateTime<Utc>) -> Order {
        let id = self.id;
        Order {
            id,
            user_id: self.user_id,
            total_amount: self.total_amount,
            status: OrderStatus::Pending,
            shipping_address: self.shipping_address,
            payment_intent_id: None,
            created_at,
            items: self
                .items
                .into_iter()
                .map(|item| OrderItem {
                    order_id: id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price_at_order_time: item.price_at_order_time,
                })
                .collect(),
        }
    }
}
