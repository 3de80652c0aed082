//! In-memory implementation of the EventBus trait for testing and development

use crate::{BusError, BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// EventBus implementation that keeps accepted messages in memory
///
/// This implementation is suitable for:
/// - Unit and integration tests of relays (no broker needed)
/// - Local development without Docker
///
/// Besides recording what was acknowledged, the bus can be scripted to fail:
/// reject a specific publish attempt, or go offline until told otherwise.
/// When built with [`InMemoryBus::with_destinations`] it also behaves like a
/// broker with a fixed set of queues and refuses anything else.
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
/// bus.reject_attempt(2);
///
/// bus.publish("orders.order_created", b"one".to_vec()).await?;
/// assert!(bus.publish("orders.order_created", b"two".to_vec()).await.is_err());
///
/// assert_eq!(bus.delivered_to("orders.order_created"), vec![b"one".to_vec()]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

#[derive(Default)]
struct BusState {
    destinations: Option<HashSet<String>>,
    delivered: Vec<BusMessage>,
    attempts: u64,
    rejected_attempts: HashSet<u64>,
    offline: bool,
}

impl InMemoryBus {
    /// Create a bus that accepts any destination
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus that only knows the given destinations
    pub fn with_destinations<I, S>(destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bus = Self::new();
        bus.lock().destinations = Some(destinations.into_iter().map(Into::into).collect());
        bus
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        // A poisoned lock only means a test panicked mid-publish; the state is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reject the `attempt`-th publish call (1-based, counted across all destinations)
    pub fn reject_attempt(&self, attempt: u64) {
        self.lock().rejected_attempts.insert(attempt);
    }

    /// Simulate the broker being unreachable (`true`) or back (`false`)
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Number of publish calls seen so far, successful or not
    pub fn publish_attempts(&self) -> u64 {
        self.lock().attempts
    }

    /// All acknowledged messages, in acknowledgement order
    pub fn delivered(&self) -> Vec<BusMessage> {
        self.lock().delivered.clone()
    }

    /// Payloads acknowledged for one destination, in acknowledgement order
    pub fn delivered_to(&self, destination: &str) -> Vec<Vec<u8>> {
        self.lock()
            .delivered
            .iter()
            .filter(|m| m.destination == destination)
            .map(|m| m.payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, destination: &str, payload: Vec<u8>) -> BusResult<()> {
        let mut state = self.lock();
        state.attempts += 1;
        let attempt = state.attempts;

        if state.offline {
            return Err(BusError::Unavailable("in-memory broker is offline".to_string()));
        }

        if let Some(known) = &state.destinations {
            if !known.contains(destination) {
                return Err(BusError::UnknownDestination(destination.to_string()));
            }
        }

        if state.rejected_attempts.remove(&attempt) {
            return Err(BusError::Rejected(format!("publish attempt {attempt} rejected")));
        }

        state.delivered.push(BusMessage::new(destination, payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_records_messages_in_order() {
        let bus = InMemoryBus::new();

        for i in 0..5 {
            bus.publish("orders.order_created", format!("message {}", i).into_bytes())
                .await
                .unwrap();
        }

        let delivered = bus.delivered_to("orders.order_created");
        assert_eq!(delivered.len(), 5);
        for (i, payload) in delivered.iter().enumerate() {
            assert_eq!(payload, &format!("message {}", i).into_bytes());
        }
    }

    #[tokio::test]
    async fn test_reject_attempt_fails_only_that_call() {
        let bus = InMemoryBus::new();
        bus.reject_attempt(2);

        assert!(bus.publish("q", b"1".to_vec()).await.is_ok());
        let err = bus.publish("q", b"2".to_vec()).await.unwrap_err();
        assert!(matches!(err, BusError::Rejected(_)));
        assert!(bus.publish("q", b"3".to_vec()).await.is_ok());

        assert_eq!(bus.publish_attempts(), 3);
        assert_eq!(bus.delivered_to("q"), vec![b"1".to_vec(), b"3".to_vec()]);
    }

    #[tokio::test]
    async fn test_offline_bus_is_unavailable() {
        let bus = InMemoryBus::new();
        bus.set_offline(true);

        let err = bus.publish("q", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, BusError::Unavailable(_)));
        assert!(bus.delivered().is_empty());

        bus.set_offline(false);
        bus.publish("q", b"x".to_vec()).await.unwrap();
        assert_eq!(bus.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_destination_is_permanent() {
        let bus = InMemoryBus::with_destinations(["orders.order_created"]);

        bus.publish("orders.order_created", b"ok".to_vec())
            .await
            .unwrap();
        let err = bus.publish("orders.typo", b"lost".to_vec()).await.unwrap_err();

        assert!(err.is_permanent());
        assert_eq!(bus.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let bus = InMemoryBus::new();
        let clone = bus.clone();

        clone.publish("q", b"shared".to_vec()).await.unwrap();
        assert_eq!(bus.delivered_to("q"), vec![b"shared".to_vec()]);
    }
}
