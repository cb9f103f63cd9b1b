pub mod reducer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GaugeConfig;
use crate::export::health::IndexMetrics;
use crate::progress::IngestError;

use self::reducer::{GaugeEvent, GaugeReducer};

/// Cloneable submission side of the gauge tracker.
#[derive(Clone, Debug)]
pub struct GaugeHandle {
    event_tx: mpsc::Sender<GaugeEvent>,
}

impl GaugeHandle {
    /// Reports a processed event. Waits while the event queue is full.
    pub async fn submit_event(
        &self,
        stream_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        let event = GaugeEvent {
            stream_id: stream_id.into(),
            timestamp,
            arrived_at: tokio::time::Instant::now().into_std(),
        };

        self.event_tx
            .send(event)
            .await
            .map_err(|_| IngestError::Closed)
    }
}

/// Keeps the process-wide health gauges current.
///
/// Runs next to the progress tracker on its own tick and writes one
/// worst-case reading per tick into [`IndexMetrics`].
pub struct GaugeTracker {
    tick_interval: Duration,
    metrics: Arc<IndexMetrics>,

    handle: GaugeHandle,
    /// Event receiver, taken by `start`.
    event_rx: Option<mpsc::Receiver<GaugeEvent>>,

    run_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl GaugeTracker {
    pub fn new(cfg: &GaugeConfig, metrics: Arc<IndexMetrics>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(cfg.event_queue_capacity.max(1));

        Self {
            tick_interval: cfg.tick_interval,
            metrics,
            handle: GaugeHandle { event_tx },
            event_rx: Some(event_rx),
            run_task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn handle(&self) -> GaugeHandle {
        self.handle.clone()
    }

    /// Spawns the reduction loop. Stops when `ctx` is cancelled.
    pub async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        let mut event_rx = self
            .event_rx
            .take()
            .context("gauge tracker already started")?;
        let metrics = Arc::clone(&self.metrics);
        let tick_interval = self.tick_interval;

        let run_task = tokio::spawn(async move {
            let mut reducer = GaugeReducer::new();
            let mut last_tick = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval_at(last_tick + tick_interval, tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = ctx.cancelled() => break,

                    _ = ticker.tick() => {
                        let now = tokio::time::Instant::now();
                        let reading = reducer.reduce(
                            now.into_std(),
                            Utc::now(),
                            now.duration_since(last_tick),
                        );
                        last_tick = now;
                        metrics.observe(&reading);
                        debug!(
                            streams = reducer.len(),
                            processing_delay = ?reading.processing_delay,
                            events_delay = ?reading.events_delay,
                            throughput = reading.throughput,
                            "health gauges updated"
                        );
                    }

                    Some(event) = event_rx.recv() => {
                        reducer.record(event);
                        metrics.events_processed.inc();
                    }
                }
            }

            debug!("gauge tracker stopped");
        });
        *self.run_task.lock().await = Some(run_task);

        info!(tick_interval = ?self.tick_interval, "gauge tracker started");

        Ok(())
    }

    /// Waits for the reduction loop to exit.
    pub async fn wait_for_shutdown(&self) {
        let run_task = { self.run_task.lock().await.take() };
        if let Some(run_task) = run_task {
            if let Err(e) = run_task.await {
                warn!(error = %e, "gauge tracker task join failed");
            }
        }
    }
}
