//! NATS JetStream implementation of the EventBus trait

use crate::{BusError, BusResult, EventBus};
use async_nats::jetstream::{self, context::PublishErrorKind, stream};
use async_nats::Client;
use async_trait::async_trait;

/// EventBus implementation using NATS JetStream
///
/// Core NATS publishes are fire-and-forget with no delivery guarantee, so this
/// bus goes through JetStream: `publish` returns only after the stream that
/// owns the destination subject has persisted the message and sent its ack.
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(client);
/// bus.ensure_stream("ORDERS", &["orders.order_created".to_string()]).await?;
/// bus.publish("orders.order_created", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
}

impl NatsBus {
    /// Create a new NatsBus from an existing NATS client
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self { client, jetstream }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Declare (or reuse) a durable file-backed stream capturing `subjects`
    ///
    /// Publishing to a subject no stream captures fails with
    /// `UnknownDestination`, so every configured destination must be listed.
    pub async fn ensure_stream(&self, name: &str, subjects: &[String]) -> BusResult<()> {
        let config = stream::Config {
            name: name.to_string(),
            subjects: subjects.to_vec(),
            storage: stream::StorageType::File,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| BusError::Setup(format!("stream {name}: {e}")))?;

        tracing::info!(stream = %name, subjects = ?subjects, "JetStream stream ready");
        Ok(())
    }
}

fn map_publish_error(destination: &str, err: jetstream::context::PublishError) -> BusError {
    match err.kind() {
        PublishErrorKind::StreamNotFound => BusError::UnknownDestination(destination.to_string()),
        PublishErrorKind::TimedOut => BusError::Timeout(err.to_string()),
        PublishErrorKind::BrokenPipe => BusError::Unavailable(err.to_string()),
        _ => BusError::Rejected(err.to_string()),
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, destination: &str, payload: Vec<u8>) -> BusResult<()> {
        let ack = self
            .jetstream
            .publish(destination.to_string(), payload.into())
            .await
            .map_err(|e| map_publish_error(destination, e))?;

        let ack = ack.await.map_err(|e| map_publish_error(destination, e))?;

        tracing::trace!(
            destination = %destination,
            stream = %ack.stream,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "JetStream publish acknowledged"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running NATS server with JetStream enabled
    // For manual testing: docker run -p 4222:4222 nats:2.10-alpine -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_publish_is_acknowledged_by_stream() {
        let client = async_nats::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        let bus = NatsBus::new(client);
        bus.ensure_stream("EVENT_BUS_TEST", &["event_bus_test.acked".to_string()])
            .await
            .expect("stream setup");

        bus.publish("event_bus_test.acked", b"hello".to_vec())
            .await
            .expect("publish should be acked");
    }

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_publish_to_unbound_subject_is_unknown_destination() {
        let client = async_nats::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        let bus = NatsBus::new(client);
        let err = bus
            .publish("event_bus_test.nobody_listens", b"hello".to_vec())
            .await
            .unwrap_err();

        assert!(err.is_permanent(), "unexpected error: {err}");
    }
}
