//! Transactional outbox
//!
//! Events are staged as rows in `outbox_messages` by the same unit of work
//! that performs the business write (see [`crate::repos::UnitOfWork`]), and
//! drained into the broker by one [`relay::EventRelay`] per event type.
//!
//! Lifecycle of a record: inserted with `published = false`, flipped once to
//! `published = true` with a `transmitted_at` timestamp. Nothing else ever
//! changes and relays never delete rows.

pub mod metrics;
pub mod relay;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use metrics::RelayMetrics;
pub use relay::{
    EventRelay, HaltReason, RelayConfig, RelayError, RelaySupervisor, RunningRelays, TickOutcome,
    TickReport,
};

/// Event type tags; one relay and one destination per tag
pub const ORDER_CREATED: &str = "OrderCreated";
pub const ORDER_UPDATED: &str = "OrderUpdated";
pub const ORDER_DEACTIVATED: &str = "OrderDeactivated";

/// A staged event
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OutboxRecord {
    pub id: i64,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub transmitted_at: Option<DateTime<Utc>>,
}

/// Errors raised by outbox persistence
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox event type cannot be empty")]
    EmptyEventType,

    #[error("outbox record not found: {0}")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("outbox storage unavailable: {0}")]
    Unavailable(String),
}

/// Reject empty type tags before they reach storage
pub fn validate_event_type(event_type: &str) -> Result<(), OutboxError> {
    if event_type.trim().is_empty() {
        return Err(OutboxError::EmptyEventType);
    }
    Ok(())
}

/// Relay-side view of the outbox
///
/// Inserting is deliberately not part of this trait: records are only
/// created through a unit of work, inside the business transaction.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Up to `limit` unpublished records of `event_type`, oldest first
    /// (`created_at ASC, id ASC`). Has no side effects.
    async fn fetch_unpublished(
        &self,
        event_type: &str,
        limit: i64,
    ) -> Result<Vec<OutboxRecord>, OutboxError>;

    /// Flip `published` to true and stamp `transmitted_at`
    ///
    /// Returns `Ok(true)` when this call made the transition and `Ok(false)`
    /// when the record was already published (the stored `transmitted_at`
    /// is left untouched).
    async fn mark_published(
        &self,
        id: i64,
        transmitted_at: DateTime<Utc>,
    ) -> Result<bool, OutboxError>;
}
