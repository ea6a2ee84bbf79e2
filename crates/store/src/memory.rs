use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use common::{OrderId, ProductId, UserId};
use domain::{Money, NewOrder, Order, OrderStatus, Product};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Result,
    store::{
        CommerceStore, InventoryLedger, ProcessedEvent, ReserveOutcome, StoreTransaction,
        TransitionOutcome,
    },
};

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    /// Kept in insertion order.
    orders: Vec<Order>,
    processed_events: HashMap<String, ProcessedEvent>,
}

impl MemoryState {
    fn order_mut(&mut self, order_id: OrderId) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.id == order_id)
    }

    fn newest_first<'a>(orders: impl DoubleEndedIterator<Item = &'a Order>) -> Vec<Order> {
        let mut out: Vec<Order> = orders.rev().cloned().collect();
        // Stable sort keeps the reversed insertion order for equal timestamps.
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}

/// In-memory store implementation for testing.
///
/// Provides the same transactional semantics as the PostgreSQL
/// implementation. A transaction holds the state lock from `begin` until
/// commit or rollback, so in-memory transactions are fully serialized.
#[derive(Clone, Default)]
pub struct InMemoryCommerceStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryCommerceStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a catalog product.
    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Changes a product's catalog price. Returns false if it does not exist.
    pub async fn set_price(&self, product_id: ProductId, price: Money) -> bool {
        match self.state.lock().await.products.get_mut(&product_id) {
            Some(product) => {
                product.price = price;
                true
            }
            None => false,
        }
    }

    /// Returns the current stock counter of a product.
    pub async fn stock_of(&self, product_id: ProductId) -> Option<i64> {
        self.state
            .lock()
            .await
            .products
            .get(&product_id)
            .map(|p| p.stock_quantity)
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Returns the number of recorded provider event ids.
    pub async fn processed_event_count(&self) -> usize {
        self.state.lock().await.processed_events.len()
    }
}

#[derive(Debug)]
enum Undo {
    Stock { product_id: ProductId, delta: i64 },
    InsertOrder(OrderId),
    Status { order_id: OrderId, previous: OrderStatus },
    RecordEvent(String),
}

/// An open in-memory transaction.
///
/// Writes go straight to the locked state and are journaled; rollback (or
/// drop without commit) replays the journal backwards.
pub struct InMemoryTransaction {
    state: OwnedMutexGuard<MemoryState>,
    undo: Vec<Undo>,
    open: bool,
}

impl InMemoryTransaction {
    fn undo_all(&mut self) {
        while let Some(op) = self.undo.pop() {
            match op {
                Undo::Stock { product_id, delta } => {
                    if let Some(product) = self.state.products.get_mut(&product_id) {
                        product.stock_quantity -= delta;
                    }
                }
                Undo::InsertOrder(order_id) => self.state.orders.retain(|o| o.id != order_id),
                Undo::Status { order_id, previous } => {
                    if let Some(order) = self.state.order_mut(order_id) {
                        order.status = previous;
                    }
                }
                Undo::RecordEvent(event_id) => {
                    self.state.processed_events.remove(&event_id);
                }
            }
        }
        self.open = false;
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.open {
            self.undo_all();
        }
    }
}

#[async_trait]
impl InventoryLedger for InMemoryTransaction {
    async fn try_reserve(
        &mut self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<ReserveOutcome> {
        let requested = i64::from(quantity);
        let Some(product) = self.state.products.get_mut(&product_id) else {
            return Ok(ReserveOutcome::ProductNotFound);
        };
        if product.stock_quantity < requested {
            return Ok(ReserveOutcome::InsufficientStock {
                available: product.stock_quantity,
            });
        }
        product.stock_quantity -= requested;
        self.undo.push(Undo::Stock {
            product_id,
            delta: -requested,
        });
        Ok(ReserveOutcome::Reserved)
    }

    async fn release(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let amount = i64::from(quantity);
        match self.state.products.get_mut(&product_id) {
            Some(product) => {
                product.stock_quantity += amount;
                self.undo.push(Undo::Stock {
                    product_id,
                    delta: amount,
                });
            }
            None => tracing::warn!(%product_id, "release for unknown product skipped"),
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn create_order(&mut self, order: NewOrder) -> Result<Order> {
        let order = order.into_order(Utc::now().trunc_subsecs(6));
        self.undo.push(Undo::InsertOrder(order.id));
        self.state.orders.push(order.clone());
        Ok(order)
    }

    async fn transition_status(
        &mut self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<TransitionOutcome> {
        let Some(order) = self.state.order_mut(order_id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if order.status != expected {
            return Ok(TransitionOutcome::Conflict {
                current: order.status,
            });
        }
        order.status = next;
        self.undo.push(Undo::Status {
            order_id,
            previous: expected,
        });
        Ok(TransitionOutcome::Updated)
    }

    async fn record_processed_event(&mut self, event: &ProcessedEvent) -> Result<bool> {
        if self.state.processed_events.contains_key(&event.event_id) {
            return Ok(false);
        }
        self.state
            .processed_events
            .insert(event.event_id.clone(), event.clone());
        self.undo.push(Undo::RecordEvent(event.event_id.clone()));
        Ok(true)
    }

    async fn commit(self) -> Result<()> {
        let mut tx = self;
        tx.undo.clear();
        tx.open = false;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        let mut tx = self;
        tx.undo_all();
        Ok(())
    }
}

#[async_trait]
impl CommerceStore for InMemoryCommerceStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        let state = self.state.clone().lock_owned().await;
        Ok(InMemoryTransaction {
            state,
            undo: Vec::new(),
            open: true,
        })
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&product_id).cloned())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.iter().find(|o| o.id == order_id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(MemoryState::newest_first(
            state.orders.iter().filter(|o| o.user_id == user_id),
        ))
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(MemoryState::newest_first(state.orders.iter()))
    }

    async fn attach_payment_intent(
        &self,
        order_id: OrderId,
        payment_intent_id: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.order_mut(order_id) {
            Some(order) => {
                order.payment_intent_id = Some(payment_intent_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .processed_events
            .contains_key(event_id))
    }
}
