//! Transactional persistence for the order fulfillment saga.
//!
//! The inventory ledger and the order store share one atomic scope, a
//! [`StoreTransaction`], so that stock reservation and order creation
//! either both commit or both roll back.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryCommerceStore;
pub use postgres::PostgresCommerceStore;
pub use store::{
    CommerceStore, CommerceStoreExt, InventoryLedger, ProcessedEvent, ReserveOutcome,
    StoreTransaction, TransitionOutcome,
};
