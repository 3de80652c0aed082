//! Outbox relay
//!
//! One relay drains one event type into one broker destination. Each tick
//! fetches a bounded batch (oldest first) and, strictly in order, publishes a
//! record and then marks it published. The first failure halts the batch: the
//! failed record and everything after it stay unpublished and are picked up
//! again on the next tick. There is no backoff, retry count or dead-lettering;
//! a broker that never recovers means the same record is retried forever, and
//! the `outbox_consecutive_failed_ticks` gauge keeps growing.
//!
//! Relays assume they are the only worker for their event type. Nothing
//! claims rows, so two processes draining the same type would publish
//! duplicates; scaling out needs a lease/claim step first.
//!
//! Ordering is by `created_at`, which is stamped when the record is written,
//! but a record only becomes visible when its transaction commits. With
//! concurrent writers a record can therefore be published after one with a
//! later `created_at` that committed first. Order holds among records that
//! were committed when a batch was fetched.

use chrono::Utc;
use event_bus::{BusError, EventBus};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{OutboxError, OutboxStore, RelayMetrics};
use crate::config::RouteConfig;

pub const DEFAULT_BATCH_SIZE: i64 = 20;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub event_type: String,
    pub destination: String,
    pub batch_size: i64,
    pub interval: Duration,
}

impl RelayConfig {
    pub fn new(event_type: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            destination: destination.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn validate(&self) -> Result<(), RelayError> {
        if self.event_type.trim().is_empty() {
            return Err(RelayError::InvalidConfig("event_type cannot be empty".into()));
        }
        if self.destination.trim().is_empty() {
            return Err(RelayError::InvalidConfig(format!(
                "destination for {} cannot be empty",
                self.event_type
            )));
        }
        if self.batch_size < 1 {
            return Err(RelayError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.interval.is_zero() {
            return Err(RelayError::InvalidConfig("interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Why a tick stopped before the end of its batch
#[derive(Debug)]
pub enum HaltReason {
    /// Broker did not acknowledge; the record was not marked
    Publish(BusError),
    /// Broker acknowledged but the mark failed; the record will be sent again
    Mark(OutboxError),
}

#[derive(Debug)]
pub enum TickOutcome {
    Drained,
    Halted { record_id: i64, reason: HaltReason },
}

#[derive(Debug)]
pub struct TickReport {
    /// Records returned by the batch fetch
    pub fetched: usize,
    /// Records acknowledged by the broker and marked published
    pub published: usize,
    pub outcome: TickOutcome,
}

impl TickReport {
    pub fn is_halted(&self) -> bool {
        matches!(self.outcome, TickOutcome::Halted { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to fetch unpublished {event_type} records: {source}")]
    Fetch {
        event_type: String,
        #[source]
        source: OutboxError,
    },

    #[error("a relay for event type {0} is already registered")]
    DuplicateEventType(String),

    #[error("invalid relay config: {0}")]
    InvalidConfig(String),
}

/// Periodic drainer for one event type
pub struct EventRelay {
    config: RelayConfig,
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
    metrics: Option<RelayMetrics>,
    consecutive_failed_ticks: AtomicI64,
}

impl EventRelay {
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn OutboxStore>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            bus,
            metrics: None,
            consecutive_failed_ticks: AtomicI64::new(0),
        })
    }

    pub fn with_metrics(mut self, metrics: RelayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn consecutive_failed_ticks(&self) -> i64 {
        self.consecutive_failed_ticks.load(Ordering::Relaxed)
    }

    /// Drain one batch
    ///
    /// Publish and mark failures halt the batch and come back as
    /// `Ok(TickReport)` with a `Halted` outcome; only a failed fetch is an
    /// `Err`. Every failure is logged and counted here.
    pub async fn tick(&self) -> Result<TickReport, RelayError> {
        let event_type = self.config.event_type.as_str();
        let destination = self.config.destination.as_str();

        let records = match self
            .store
            .fetch_unpublished(event_type, self.config.batch_size)
            .await
        {
            Ok(records) => records,
            Err(source) => {
                tracing::error!(
                    event_type = %event_type,
                    error = %source,
                    "Outbox relay could not fetch unpublished records"
                );
                if let Some(m) = &self.metrics {
                    m.fetch_failures_total.with_label_values(&[event_type]).inc();
                }
                self.record_tick(false);
                return Err(RelayError::Fetch {
                    event_type: event_type.to_string(),
                    source,
                });
            }
        };

        let fetched = records.len();
        let mut published = 0;

        // take() guards the batch bound even if a store over-returns
        let batch_size = usize::try_from(self.config.batch_size).unwrap_or(usize::MAX);
        for record in records.into_iter().take(batch_size) {
            let record_id = record.id;

            if let Err(e) = self.bus.publish(destination, record.payload.into_bytes()).await {
                tracing::error!(
                    record_id,
                    event_type = %event_type,
                    destination = %destination,
                    error = %e,
                    error_kind = e.kind(),
                    permanent = e.is_permanent(),
                    published_before_halt = published,
                    "Publish failed, halting outbox batch"
                );
                if let Some(m) = &self.metrics {
                    m.publish_failures_total
                        .with_label_values(&[event_type, e.kind()])
                        .inc();
                }
                return Ok(self.halt(fetched, published, record_id, HaltReason::Publish(e)));
            }

            match self.store.mark_published(record_id, Utc::now()).await {
                Ok(transitioned) => {
                    if !transitioned {
                        tracing::debug!(
                            record_id,
                            event_type = %event_type,
                            "Record was already marked published"
                        );
                    }
                    published += 1;
                    if let Some(m) = &self.metrics {
                        m.published_total.with_label_values(&[event_type]).inc();
                    }
                    tracing::trace!(
                        record_id,
                        event_type = %event_type,
                        destination = %destination,
                        "Outbox record published"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        record_id,
                        event_type = %event_type,
                        error = %e,
                        "Record published but mark failed; it will be re-published next tick"
                    );
                    if let Some(m) = &self.metrics {
                        m.mark_failures_total.with_label_values(&[event_type]).inc();
                    }
                    return Ok(self.halt(fetched, published, record_id, HaltReason::Mark(e)));
                }
            }
        }

        self.record_tick(true);
        if published > 0 {
            tracing::info!(
                event_type = %event_type,
                destination = %destination,
                published,
                "Outbox batch drained"
            );
        }

        Ok(TickReport {
            fetched,
            published,
            outcome: TickOutcome::Drained,
        })
    }

    fn halt(
        &self,
        fetched: usize,
        published: usize,
        record_id: i64,
        reason: HaltReason,
    ) -> TickReport {
        self.record_tick(false);
        TickReport {
            fetched,
            published,
            outcome: TickOutcome::Halted { record_id, reason },
        }
    }

    fn record_tick(&self, ok: bool) {
        let failed = if ok {
            self.consecutive_failed_ticks.store(0, Ordering::Relaxed);
            0
        } else {
            self.consecutive_failed_ticks.fetch_add(1, Ordering::Relaxed) + 1
        };
        if let Some(m) = &self.metrics {
            m.consecutive_failed_ticks
                .with_label_values(&[self.config.event_type.as_str()])
                .set(failed);
        }
    }

    /// Tick on a fixed cadence until `shutdown` is cancelled
    ///
    /// Ticks run inline in this task, so they never overlap; a tick that
    /// outlasts the interval delays the next one. Cancellation is only
    /// observed between ticks.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            event_type = %self.config.event_type,
            destination = %self.config.destination,
            batch_size = self.config.batch_size,
            interval_secs = self.config.interval.as_secs(),
            "Starting outbox relay"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    // Errors were already logged and counted inside tick()
                    let _ = self.tick().await;
                }
            }
        }

        tracing::info!(event_type = %self.config.event_type, "Outbox relay stopped");
    }
}

/// Owns the relays of the process: at most one per event type
#[derive(Default)]
pub struct RelaySupervisor {
    relays: Vec<EventRelay>,
    event_types: HashSet<String>,
}

impl RelaySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// One relay per configured route, all sharing the store, bus and metrics
    pub fn from_routes(
        routes: &[RouteConfig],
        batch_size: i64,
        interval: Duration,
        store: Arc<dyn OutboxStore>,
        bus: Arc<dyn EventBus>,
        metrics: RelayMetrics,
    ) -> Result<Self, RelayError> {
        let mut supervisor = Self::new();
        for route in routes {
            let config = RelayConfig::new(route.event_type, route.destination.clone())
                .with_batch_size(batch_size)
                .with_interval(interval);
            let relay = EventRelay::new(config, store.clone(), bus.clone())?
                .with_metrics(metrics.clone());
            supervisor.register(relay)?;
        }
        Ok(supervisor)
    }

    /// Add a relay; a second relay for an already-covered event type is refused
    pub fn register(&mut self, relay: EventRelay) -> Result<(), RelayError> {
        let event_type = relay.config().event_type.clone();
        if !self.event_types.insert(event_type.clone()) {
            return Err(RelayError::DuplicateEventType(event_type));
        }
        self.relays.push(relay);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Spawn every relay on the current runtime
    pub fn start(self) -> RunningRelays {
        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for relay in self.relays {
            tasks.spawn(relay.run(shutdown.child_token()));
        }

        tracing::info!(relays = tasks.len(), "Outbox relays started");
        RunningRelays { shutdown, tasks }
    }
}

/// Handle to started relays
pub struct RunningRelays {
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
}

impl RunningRelays {
    /// Stop all relays, letting in-flight ticks finish
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "Outbox relay task ended abnormally");
            }
        }
        tracing::info!("Outbox relays shut down");
    }
}
