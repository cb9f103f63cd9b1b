pub mod refresh;
pub mod store;
pub mod table;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProgressConfig;
use crate::export::health::IndexMetrics;

use self::refresh::RangeSource;
use self::store::{ProcessedEvent, ProgressStore, RangeUpdate, StreamRange};
use self::table::ProgressRenderer;

/// Range updates are freshness data: one pending slot is enough.
const RANGE_QUEUE_CAPACITY: usize = 1;

/// Errors returned when submitting to the progress tracker.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IngestError {
    #[error("negative offset height {height} for stream {stream_id}")]
    NegativeHeight { stream_id: String, height: i64 },

    #[error("invalid range for stream {stream_id}: last height {last} is below first height {first}")]
    InvertedRange {
        stream_id: String,
        first: i64,
        last: i64,
    },

    #[error("progress tracker is not running")]
    Closed,
}

/// Cloneable submission side of the progress tracker.
#[derive(Clone, Debug)]
pub struct ProgressHandle {
    event_tx: mpsc::Sender<ProcessedEvent>,
    range_tx: mpsc::Sender<RangeUpdate>,
}

impl ProgressHandle {
    /// Reports a processed event. Waits while the event queue is full.
    pub async fn submit_event(
        &self,
        stream_id: impl Into<String>,
        height: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        let stream_id = stream_id.into();
        if height < 0 {
            return Err(IngestError::NegativeHeight { stream_id, height });
        }

        let event = ProcessedEvent {
            stream_id,
            height,
            timestamp,
            arrived_at: tokio::time::Instant::now().into_std(),
        };

        self.event_tx
            .send(event)
            .await
            .map_err(|_| IngestError::Closed)
    }

    /// Reports the current offset range of a stream.
    pub async fn submit_range(
        &self,
        stream_id: impl Into<String>,
        first_height: i64,
        last_height: i64,
    ) -> Result<(), IngestError> {
        let stream_id = stream_id.into();
        for height in [first_height, last_height] {
            if height < 0 {
                return Err(IngestError::NegativeHeight { stream_id, height });
            }
        }
        if last_height < first_height {
            return Err(IngestError::InvertedRange {
                stream_id,
                first: first_height,
                last: last_height,
            });
        }

        let update = RangeUpdate {
            stream_id,
            range: StreamRange {
                first_height,
                last_height,
            },
        };

        self.range_tx
            .send(update)
            .await
            .map_err(|_| IngestError::Closed)
    }
}

/// Aggregates per-stream progress and redraws the progress table on every
/// tick.
///
/// All stream state lives inside a single task. Producers talk to it
/// through a [`ProgressHandle`]; range updates always take priority over
/// queued events.
pub struct ProgressTracker {
    tick_interval: Duration,
    refresh_interval: Duration,
    metrics: Option<Arc<IndexMetrics>>,

    handle: ProgressHandle,
    /// Event receiver, taken by `start`.
    event_rx: Option<mpsc::Receiver<ProcessedEvent>>,
    /// Range receiver, taken by `start`.
    range_rx: Option<mpsc::Receiver<RangeUpdate>>,

    run_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ProgressTracker {
    /// Creates a tracker. Submissions queue up until `start` is called.
    pub fn new(cfg: &ProgressConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(cfg.event_queue_capacity.max(1));
        let (range_tx, range_rx) = mpsc::channel(RANGE_QUEUE_CAPACITY);

        Self {
            tick_interval: cfg.tick_interval,
            refresh_interval: cfg.range_refresh_interval,
            metrics: None,
            handle: ProgressHandle { event_tx, range_tx },
            event_rx: Some(event_rx),
            range_rx: Some(range_rx),
            run_task: tokio::sync::Mutex::new(None),
        }
    }

    /// Attaches health metrics, used to count failed range lookups.
    pub fn with_metrics(mut self, metrics: Arc<IndexMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns a submission handle.
    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    /// Spawns the aggregation loop. Stops when `ctx` is cancelled, without a
    /// final redraw; anything still queued is discarded.
    pub async fn start(
        &mut self,
        renderer: Box<dyn ProgressRenderer>,
        ctx: CancellationToken,
    ) -> Result<()> {
        let event_rx = self
            .event_rx
            .take()
            .context("progress tracker already started")?;
        let range_rx = self
            .range_rx
            .take()
            .context("progress tracker already started")?;

        let run_task = tokio::spawn(run_loop(
            event_rx,
            range_rx,
            renderer,
            self.tick_interval,
            ctx,
        ));
        *self.run_task.lock().await = Some(run_task);

        info!(tick_interval = ?self.tick_interval, "progress tracker started");

        Ok(())
    }

    /// Starts polling `source` for the range of `stream_id` on the
    /// configured refresh interval.
    pub fn spawn_range_refresher<S: RangeSource + 'static>(
        &self,
        stream_id: impl Into<String>,
        source: Arc<S>,
        ctx: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        refresh::spawn_refresher(
            self.handle(),
            stream_id.into(),
            source,
            self.refresh_interval,
            ctx,
            self.metrics
                .as_ref()
                .map(|m| m.range_lookup_errors.clone()),
        )
    }

    /// Waits for the aggregation loop to exit.
    pub async fn wait_for_shutdown(&self) {
        let run_task = { self.run_task.lock().await.take() };
        if let Some(run_task) = run_task {
            if let Err(e) = run_task.await {
                warn!(error = %e, "progress tracker task join failed");
            }
        }
    }
}

async fn run_loop(
    mut event_rx: mpsc::Receiver<ProcessedEvent>,
    mut range_rx: mpsc::Receiver<RangeUpdate>,
    mut renderer: Box<dyn ProgressRenderer>,
    tick_interval: Duration,
    ctx: CancellationToken,
) {
    let mut store = ProgressStore::new();
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + tick_interval, tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        if ctx.is_cancelled() {
            break;
        }

        // Range updates first, so a refreshed range is visible to the
        // next tick even while events are queued.
        while let Ok(update) = range_rx.try_recv() {
            store.apply_range(update, now());
        }

        tokio::select! {
            biased;

            _ = ctx.cancelled() => break,

            Some(update) = range_rx.recv() => {
                store.apply_range(update, now());
            }

            _ = ticker.tick() => {
                let rows = store.snapshot(now(), Utc::now());
                if rows.is_empty() {
                    continue;
                }
                if let Err(e) = renderer.render(&rows) {
                    warn!(error = %e, "rendering progress table failed");
                }
                debug!(streams = rows.len(), "progress snapshot rendered");
            }

            Some(event) = event_rx.recv() => {
                store.apply_event(event);
            }
        }
    }

    debug!(streams = store.len(), "progress tracker stopped");
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
