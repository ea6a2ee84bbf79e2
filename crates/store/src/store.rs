use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use domain::{NewOrder, Order, OrderStatus, Product};

use crate::Result;

/// Result of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Stock was decremented by the requested quantity.
    Reserved,
    /// Current stock is below the requested quantity; nothing changed.
    InsufficientStock { available: i64 },
    /// The product does not exist (or vanished concurrently); nothing changed.
    ProductNotFound,
}

/// Result of a compare-and-swap on an order's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The stored status matched the expected one and was replaced.
    Updated,
    /// The stored status no longer matches the expected one.
    ///
    /// Callers applying provider events treat this as a benign no-op.
    Conflict { current: OrderStatus },
    /// No order with this id exists.
    NotFound,
}

/// A provider event id recorded for deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub order_id: OrderId,
}

/// Stock operations. Only available inside a [`StoreTransaction`].
#[async_trait]
pub trait InventoryLedger: Send {
    /// Decrements stock by `quantity` if and only if enough stock remains.
    ///
    /// The check and the write are a single conditional update, never a
    /// read followed by a write.
    async fn try_reserve(&mut self, product_id: ProductId, quantity: u32)
    -> Result<ReserveOutcome>;

    /// Gives `quantity` units back to a product.
    async fn release(&mut self, product_id: ProductId, quantity: u32) -> Result<()>;
}

/// An open atomic scope over the ledger, the order rows and the dedup table.
///
/// Nothing written through a transaction is visible to other callers until
/// [`commit`](StoreTransaction::commit). Dropping a transaction without
/// committing rolls it back.
#[async_trait]
pub trait StoreTransaction: InventoryLedger {
    /// Persists a priced order and its items with status `Pending`.
    async fn create_order(&mut self, order: NewOrder) -> Result<Order>;

    /// Replaces the status with `next` only if it currently equals `expected`.
    async fn transition_status(
        &mut self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<TransitionOutcome>;

    /// Records a provider event id. Returns `false` if it was already recorded.
    async fn record_processed_event(&mut self, event: &ProcessedEvent) -> Result<bool>;

    /// Makes every write of this transaction durable and visible.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self) -> Result<()>;
}

/// Core trait for store implementations.
///
/// All implementations must be thread-safe (Send + Sync); the service may
/// run as several processes against the same database, so every guard on
/// shared state lives in the storage engine.
#[async_trait]
pub trait CommerceStore: Send + Sync {
    /// The atomic scope type of this backend.
    type Transaction: StoreTransaction + 'static;

    /// Opens a new atomic scope.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Reads a product from the catalog.
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Loads an order with its items.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first.
    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Lists every order, newest first.
    async fn list_orders(&self) -> Result<Vec<Order>>;

    /// Stores the `order_id -> payment_intent_id` association.
    ///
    /// Returns `false` if the order does not exist.
    async fn attach_payment_intent(&self, order_id: OrderId, payment_intent_id: &str)
    -> Result<bool>;

    /// Returns true if a provider event id has already been applied.
    async fn is_event_processed(&self, event_id: &str) -> Result<bool>;
}

/// Extension trait providing convenience methods for stores.
#[async_trait]
pub trait CommerceStoreExt: CommerceStore {
    /// Runs a single status compare-and-swap in its own transaction.
    async fn transition_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.begin().await?;
        let outcome = tx.transition_status(order_id, expected, next).await?;
        tx.commit().await?;
        Ok(outcome)
    }
}

// Blanket implementation for all CommerceStore implementations
impl<T: CommerceStore + ?Sized> CommerceStoreExt for T {}
