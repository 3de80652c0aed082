//! # Event Envelope
//!
//! The serialized body of every event a relay publishes.
//!
//! ## Envelope Fields
//!
//! - `event_id`: Unique identifier; consumers dedupe on it because relays
//!   deliver at least once
//! - `event_type`: The outbox type tag (e.g. `OrderCreated`)
//! - `occurred_at`: When the business change was made
//! - `source_module`: Module that produced the event
//! - `source_version`: Semantic version of the source module
//! - `correlation_id`: Links related events in a business transaction
//! - `payload`: Event-specific data (generic type parameter)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard event envelope
///
/// # Examples
///
/// ```rust
/// use event_bus::EventEnvelope;
/// use serde::Serialize;
///
/// #[derive(Debug, Serialize)]
/// struct OrderCreated {
///     order_id: String,
///     amount: String,
/// }
///
/// let envelope = EventEnvelope::new(
///     "OrderCreated",
///     "orders",
///     OrderCreated {
///         order_id: "ord_123".to_string(),
///         amount: "150.00".to_string(),
///     },
/// )
/// .with_source_version("1.4.0");
///
/// assert!(envelope.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event identifier (idempotency key)
    pub event_id: Uuid,

    /// Outbox type tag of the event
    pub event_type: String,

    /// ISO 8601 timestamp when event was generated
    pub occurred_at: DateTime<Utc>,

    /// Module that generated the event (e.g., "orders")
    pub source_module: String,

    /// Semantic version of the source module
    pub source_version: String,

    /// Links related events in a business transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Event-specific payload
    pub payload: T,
}

/// Reasons an envelope is not fit to be enqueued
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("event_type cannot be empty")]
    EmptyEventType,

    #[error("source_module cannot be empty")]
    EmptySourceModule,

    #[error("source_version cannot be empty")]
    EmptySourceVersion,
}

impl<T> EventEnvelope<T> {
    /// Create a new envelope with a fresh event_id and occurred_at = now
    ///
    /// The source_version defaults to "1.0.0"; modules should override it
    /// with their own `CARGO_PKG_VERSION`.
    pub fn new(event_type: impl Into<String>, source_module: impl Into<String>, payload: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            occurred_at: Utc::now(),
            source_module: source_module.into(),
            source_version: "1.0.0".to_string(),
            correlation_id: None,
            payload,
        }
    }

    /// Set the source version
    pub fn with_source_version(mut self, version: impl Into<String>) -> Self {
        self.source_version = version.into();
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Check the required metadata fields
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.event_type.trim().is_empty() {
            return Err(EnvelopeError::EmptyEventType);
        }
        if self.source_module.trim().is_empty() {
            return Err(EnvelopeError::EmptySourceModule);
        }
        if self.source_version.trim().is_empty() {
            return Err(EnvelopeError::EmptySourceVersion);
        }
        Ok(())
    }
}
