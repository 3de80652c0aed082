//! Storage seam for orders and their outbox records
//!
//! Every write goes through a [`UnitOfWork`]: the order change and the outbox
//! insert that announces it are committed together or not at all. Dropping a
//! unit of work without calling [`UnitOfWork::commit`] rolls it back.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Order, Page, PageRequest};
use crate::outbox::OutboxError;

pub use in_memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt order row {id}: {reason}")]
    CorruptRow { id: Uuid, reason: String },

    #[error("Order {0} was changed by another writer")]
    Conflict(Uuid),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// One atomic transaction over orders and outbox records
#[async_trait]
pub trait UnitOfWork: Send {
    /// Returns the order as stored (column precision applied)
    async fn insert_order(&mut self, order: &Order) -> Result<Order, StoreError>;

    /// Load an active order for modification
    ///
    /// A concurrent write to the same order can never be lost: Postgres
    /// locks the row until commit, the in-memory store fails the commit.
    async fn find_active_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Returns the order as stored (column precision applied)
    async fn update_order(&mut self, order: &Order) -> Result<Order, StoreError>;

    /// Stage an unpublished outbox record; returns its id
    async fn insert_outbox(&mut self, event_type: &str, payload: &str) -> Result<i64, OutboxError>;

    /// Fails with `Conflict` if an order loaded by `find_active_order` was
    /// changed by another unit of work in the meantime
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Order persistence: transactional writes plus read-only queries
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    async fn get_active_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Active orders, newest first
    async fn list_active_orders(&self, page: PageRequest) -> Result<Page<Order>, StoreError>;
}
