//! Order records, pricing and the status state machine.

mod model;
mod state;
mod value_objects;

pub use model::{NewOrder, NewOrderItem, Order, OrderItem, PricedLine};
pub use state::{OrderStatus, UnknownStatus};
pub use value_objects::Money;

use common::ProductId;
use thiserror::Error;

/// Validation errors raised while pricing a new order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The request contained no line items.
    #[error("Order has no items")]
    NoItems,

    /// A line item asked for zero units.
    #[error("Invalid quantity for product {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// The catalog returned a negative price.
    #[error("Invalid price for product {product_id}: {price}")]
    InvalidPrice { product_id: ProductId, price: Money },

    /// No shipping address was supplied.
    #[error("Shipping address is required")]
    ShippingAddressRequired,

    /// The order total does not fit in the money representation.
    #[error("Order total overflows")]
    AmountOverflow,
}
