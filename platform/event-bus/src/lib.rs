//! # Broker client
//!
//! The seam between outbox relays and the message broker. A relay hands a
//! destination name and a serialized payload to [`EventBus::publish`] and
//! only treats the message as sent once the broker has acknowledged it.
//!
//! ## Implementations
//!
//! - **NatsBus**: NATS JetStream; `publish` waits for the stream's `PublishAck`
//! - **InMemoryBus**: dev/test broker that records accepted messages and can
//!   be scripted to reject or drop publishes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, InMemoryBus, NatsBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Production: JetStream, with a durable stream bound to the destinations
//! let client = async_nats::connect("nats://localhost:4222").await?;
//! let nats = NatsBus::new(client);
//! nats.ensure_stream("ORDERS", &["orders.order_created".to_string()]).await?;
//! let bus: Arc<dyn EventBus> = Arc::new(nats);
//!
//! // Dev/Test: in-memory
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! bus.publish("orders.order_created", br#"{"id":"1"}"#.to_vec()).await?;
//! # Ok(())
//! # }
//! ```

mod envelope;
mod inmemory_bus;
mod nats_bus;

pub use envelope::{EnvelopeError, EventEnvelope};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use std::fmt;

/// A message accepted by a broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Queue/subject the message was published to
    pub destination: String,
    /// Raw payload bytes, exactly as handed to `publish`
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(destination: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            destination: destination.into(),
            payload,
        }
    }
}

/// Errors that can occur when publishing to the broker
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("message rejected by broker: {0}")]
    Rejected(String),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("timed out waiting for broker acknowledgement: {0}")]
    Timeout(String),

    #[error("stream setup failed: {0}")]
    Setup(String),
}

impl BusError {
    /// Permanent errors will not go away by retrying; they point at
    /// configuration (a destination nothing is bound to).
    pub fn is_permanent(&self) -> bool {
        matches!(self, BusError::UnknownDestination(_) | BusError::Setup(_))
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            BusError::Unavailable(_) => "unavailable",
            BusError::Rejected(_) => "rejected",
            BusError::UnknownDestination(_) => "unknown_destination",
            BusError::Timeout(_) => "timeout",
            BusError::Setup(_) => "setup",
        }
    }
}

/// Result type for broker operations
pub type BusResult<T> = Result<T, BusError>;

/// Broker client consumed by outbox relays
///
/// Any `Err` is a non-ack. Implementations must not report `Ok` before the
/// broker has taken responsibility for the message.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish `payload` to `destination` and wait for the broker's ack
    async fn publish(&self, destination: &str, payload: Vec<u8>) -> BusResult<()>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors() {
        assert!(BusError::UnknownDestination("x".into()).is_permanent());
        assert!(BusError::Setup("x".into()).is_permanent());
        assert!(!BusError::Unavailable("x".into()).is_permanent());
        assert!(!BusError::Rejected("x".into()).is_permanent());
        assert!(!BusError::Timeout("x".into()).is_permanent());
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(BusError::Unavailable("x".into()).kind(), "unavailable");
        assert_eq!(
            BusError::UnknownDestination("x".into()).kind(),
            "unknown_destination"
        );
    }
}
