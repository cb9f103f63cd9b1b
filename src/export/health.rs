use anyhow::Result;
use prometheus::{Gauge, IntCounter, Opts, Registry};

use crate::gauge::reducer::GaugeReading;

/// Prometheus metrics describing indexing health.
///
/// Registered into a caller-supplied registry so tests and embedders can
/// keep independent instances.
pub struct IndexMetrics {
    /// Seconds since the stalest stream last delivered an event.
    pub processing_delay: Gauge,
    /// Seconds between now and the oldest per-stream latest event timestamp.
    pub events_delay: Gauge,
    /// Events per second of the slowest stream over the last tick.
    pub throughput: Gauge,
    /// Total event notifications consumed by the gauge loop.
    pub events_processed: IntCounter,
    /// Total failed stream range lookups.
    pub range_lookup_errors: IntCounter,
    /// Total status updates rejected by the status API.
    pub status_updates_rejected: IntCounter,
}

impl IndexMetrics {
    /// Creates the metrics and registers them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self> {
        let processing_delay = Gauge::with_opts(Opts::new(
            "processing_delay_seconds",
            "Seconds since the stalest stream last delivered an event.",
        ))?;
        let events_delay = Gauge::with_opts(Opts::new(
            "events_delay_seconds",
            "Age in seconds of the oldest latest event timestamp across streams.",
        ))?;
        let throughput = Gauge::with_opts(Opts::new(
            "processing_speed_events_per_sec",
            "Events per second of the slowest stream.",
        ))?;
        let events_processed = IntCounter::with_opts(Opts::new(
            "events_processed_total",
            "Total processed events reported to the health gauges.",
        ))?;
        let range_lookup_errors = IntCounter::with_opts(Opts::new(
            "range_lookup_errors_total",
            "Total failed stream range lookups.",
        ))?;
        let status_updates_rejected = IntCounter::with_opts(Opts::new(
            "status_updates_rejected_total",
            "Total rejected stream status updates.",
        ))?;

        registry.register(Box::new(processing_delay.clone()))?;
        registry.register(Box::new(events_delay.clone()))?;
        registry.register(Box::new(throughput.clone()))?;
        registry.register(Box::new(events_processed.clone()))?;
        registry.register(Box::new(range_lookup_errors.clone()))?;
        registry.register(Box::new(status_updates_rejected.clone()))?;

        Ok(Self {
            processing_delay,
            events_delay,
            throughput,
            events_processed,
            range_lookup_errors,
            status_updates_rejected,
        })
    }

    /// Publishes one gauge reading.
    pub fn observe(&self, reading: &GaugeReading) {
        self.processing_delay
            .set(reading.processing_delay.as_secs_f64());
        self.events_delay.set(reading.events_delay.as_secs_f64());
        self.throughput.set(reading.throughput);
    }
}
