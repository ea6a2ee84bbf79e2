//! Domain layer for the order fulfillment service.
//!
//! This crate holds the pure types the saga works with:
//! - `Money` amounts in integer cents
//! - `Product` as read from the catalog
//! - `Order` / `OrderItem` records and the `OrderStatus` state machine
//! - `NewOrder` pricing, which freezes the price snapshot and total

pub mod order;
pub mod product;

pub use order::{
    Money, NewOrder, NewOrderItem, Order, OrderError, OrderItem, OrderStatus, PricedLine,
    UnknownStatus,
};
pub use product::Product;
