use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Prometheus sink for relay outcomes, shared by all relays of the process
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,

    pub published_total: IntCounterVec,
    pub publish_failures_total: IntCounterVec,
    pub mark_failures_total: IntCounterVec,
    pub fetch_failures_total: IntCounterVec,

    pub consecutive_failed_ticks: IntGaugeVec,
}

impl RelayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let published_total = IntCounterVec::new(
            Opts::new("outbox_published_total", "Outbox records published and acknowledged"),
            &["event_type"],
        )?;

        let publish_failures_total = IntCounterVec::new(
            Opts::new("outbox_publish_failures_total", "Broker publish failures"),
            &["event_type", "kind"], // kind: unavailable|rejected|unknown_destination|timeout|setup
        )?;

        let mark_failures_total = IntCounterVec::new(
            Opts::new(
                "outbox_mark_failures_total",
                "Records published but not marked (will be re-sent)",
            ),
            &["event_type"],
        )?;

        let fetch_failures_total = IntCounterVec::new(
            Opts::new("outbox_fetch_failures_total", "Failed unpublished-batch reads"),
            &["event_type"],
        )?;

        let consecutive_failed_ticks = IntGaugeVec::new(
            Opts::new(
                "outbox_consecutive_failed_ticks",
                "Relay ticks in a row that ended in a failure",
            ),
            &["event_type"],
        )?;

        registry.register(Box::new(published_total.clone()))?;
        registry.register(Box::new(publish_failures_total.clone()))?;
        registry.register(Box::new(mark_failures_total.clone()))?;
        registry.register(Box::new(fetch_failures_total.clone()))?;
        registry.register(Box::new(consecutive_failed_ticks.clone()))?;

        Ok(Self {
            registry,
            published_total,
            publish_failures_total,
            mark_failures_total,
            fetch_failures_total,
            consecutive_failed_ticks,
        })
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}
