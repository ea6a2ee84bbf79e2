//! Catalog product as seen by the order saga.

use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::order::Money;

/// The subset of a catalog product the saga reads.
///
/// The catalog owns products; the saga only reads `price` and
/// atomically decrements `stock_quantity` through the inventory ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock_quantity: i64,
}

impl Product {
    /// Creates a product record.
    pub fn new(id: ProductId, name: impl Into<String>, price: Money, stock_quantity: i64) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            stock_quantity,
        }
    }

    /// Returns true if `quantity` units could currently be reserved.
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock_quantity >= i64::from(quantity)
    }
}
