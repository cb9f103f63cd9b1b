//! Synthetic streams for trying indexwatch without a real consumer.
//!
//! Each demo stream has a chain head that keeps growing and a consumer that
//! starts behind it and catches up at its own rate. Event timestamps trail
//! wall-clock time by the remaining backlog, one second per height.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::Reporter;
use crate::progress::refresh::{RangeLookupError, RangeSource};
use crate::progress::store::StreamRange;
use crate::progress::IngestError;
use crate::status::BlockNumber;

/// Events between two status updates.
const STATUS_EVERY: i64 = 25;

/// Parameters of one synthetic stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoStream {
    pub stream_id: String,
    pub network: String,
    /// Consumer events per second.
    pub rate: f64,
    pub start_height: i64,
    pub initial_head: i64,
    /// Chain head growth per second.
    pub head_growth: i64,
}

impl DemoStream {
    /// Builds `count` streams with staggered rates and backlogs over two
    /// networks.
    pub fn generate(count: usize) -> Vec<Self> {
        (0..count as i64)
            .map(|i| Self {
                stream_id: format!("demo-{i}"),
                network: format!("net{}", i % 2 + 1),
                rate: 20.0 * (i + 1) as f64,
                start_height: 1_000 * i,
                initial_head: 1_000 * i + 600 * (i + 1),
                head_growth: 2,
            })
            .collect()
    }
}

/// Chain heads of the demo streams. Also serves as their range source.
#[derive(Debug, Default)]
pub struct DemoSource {
    heads: HashMap<String, Arc<AtomicI64>>,
    streams: Vec<DemoStream>,
}

impl DemoSource {
    pub fn new(streams: Vec<DemoStream>) -> Self {
        let heads = streams
            .iter()
            .map(|s| (s.stream_id.clone(), Arc::new(AtomicI64::new(s.initial_head))))
            .collect();
        Self { heads, streams }
    }

    pub fn streams(&self) -> &[DemoStream] {
        &self.streams
    }

    /// Current chain head of `stream_id`.
    pub fn head(&self, stream_id: &str) -> Option<i64> {
        self.heads.get(stream_id).map(|h| h.load(Ordering::Relaxed))
    }

    /// Spawns one producer per stream plus the chain head ticker.
    pub fn spawn(
        self: &Arc<Self>,
        reporter: Reporter,
        ctx: CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(self.streams.len() + 1);
        tasks.push(self.spawn_chain(ctx.clone()));

        for stream in &self.streams {
            let Some(head) = self.heads.get(&stream.stream_id).cloned() else {
                continue;
            };
            tasks.push(tokio::spawn(produce(
                stream.clone(),
                head,
                reporter.clone(),
                ctx.clone(),
            )));
        }

        tasks
    }

    fn spawn_chain(self: &Arc<Self>, ctx: CancellationToken) -> tokio::task::JoinHandle<()> {
        let source = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = ticker.tick() => {
                        for stream in &source.streams {
                            if let Some(head) = source.heads.get(&stream.stream_id) {
                                head.fetch_add(stream.head_growth, Ordering::Relaxed);
                            }
                        }
                    }
                }
            }
        })
    }
}

impl RangeSource for DemoSource {
    async fn lookup_range(&self, stream_id: &str) -> Result<StreamRange, RangeLookupError> {
        let stream = self
            .streams
            .iter()
            .find(|s| s.stream_id == stream_id)
            .ok_or_else(|| RangeLookupError::NotFound(stream_id.to_string()))?;
        let last_height = self
            .head(stream_id)
            .ok_or_else(|| RangeLookupError::NoOffsets(stream_id.to_string()))?;

        Ok(StreamRange {
            first_height: stream.start_height.min(last_height),
            last_height,
        })
    }
}

async fn produce(
    stream: DemoStream,
    head: Arc<AtomicI64>,
    reporter: Reporter,
    ctx: CancellationToken,
) {
    let period = Duration::from_secs_f64(1.0 / stream.rate.max(0.001));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut height = stream.start_height;

    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let chain_head = head.load(Ordering::Relaxed);
        if height >= chain_head {
            continue;
        }
        height += 1;

        let timestamp = Utc::now() - chrono::Duration::seconds(chain_head - height);
        let submitted = tokio::select! {
            _ = ctx.cancelled() => break,
            submitted = reporter.event_processed(&stream.stream_id, height, timestamp) => submitted,
        };
        match submitted {
            Ok(()) => {}
            Err(IngestError::Closed) => break,
            Err(e) => {
                warn!(stream = %stream.stream_id, error = %e, "demo event rejected");
                continue;
            }
        }

        if (height - stream.start_height) % STATUS_EVERY == 0 {
            if let Err(e) = reporter.update_status(
                &stream.stream_id,
                timestamp,
                BlockNumber::from(height.unsigned_abs()),
            ) {
                warn!(stream = %stream.stream_id, error = %e, "demo status update rejected");
            }
        }
    }

    debug!(stream = %stream.stream_id, height, "demo producer stopped");
}
