use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::calc::{self, Eta};

/// Known start and current end of a stream, in offset heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRange {
    pub first_height: i64,
    pub last_height: i64,
}

/// A processed-event notification as seen by the aggregator.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub stream_id: String,
    /// Offset height of the event within its stream.
    pub height: i64,
    /// Wall-clock time embedded in the event itself.
    pub timestamp: DateTime<Utc>,
    /// When the aggregator received the notification.
    pub arrived_at: Instant,
}

/// A refreshed offset range for one stream.
#[derive(Debug, Clone)]
pub struct RangeUpdate {
    pub stream_id: String,
    pub range: StreamRange,
}

#[derive(Debug, Clone, Copy)]
struct LastEvent {
    height: i64,
    timestamp: DateTime<Utc>,
}

/// Running progress of a single stream.
#[derive(Debug)]
pub struct StreamProgress {
    last_event: Option<LastEvent>,
    range: Option<StreamRange>,
    messages_processed: u64,
    messages_at_last_snapshot: u64,
    last_snapshot_at: Instant,
    started_at: Instant,
}

impl StreamProgress {
    fn new(now: Instant) -> Self {
        Self {
            last_event: None,
            range: None,
            messages_processed: 0,
            messages_at_last_snapshot: 0,
            last_snapshot_at: now,
            started_at: now,
        }
    }

    pub fn messages_processed(&self) -> u64 {
        self.messages_processed
    }

    pub fn range(&self) -> Option<StreamRange> {
        self.range
    }

    pub fn last_height(&self) -> Option<i64> {
        self.last_event.map(|e| e.height)
    }

    /// Builds the row for this stream and starts a new speed window.
    ///
    /// Returns `None` until both an event and a range have been seen.
    fn snapshot(
        &mut self,
        stream_id: &str,
        now: Instant,
        wall_now: DateTime<Utc>,
    ) -> Option<ProgressRow> {
        let (event, range) = match (self.last_event, self.range) {
            (Some(event), Some(range)) => (event, range),
            _ => return None,
        };

        let avg_speed = calc::rate_per_sec(
            self.messages_processed,
            now.saturating_duration_since(self.started_at),
        );
        let window_speed = calc::rate_per_sec(
            self.messages_processed - self.messages_at_last_snapshot,
            now.saturating_duration_since(self.last_snapshot_at),
        );
        let lag = (wall_now - event.timestamp)
            .to_std()
            .map(calc::truncate_to_secs)
            .unwrap_or(Duration::ZERO);

        self.messages_at_last_snapshot = self.messages_processed;
        self.last_snapshot_at = now;

        Some(ProgressRow {
            stream_id: stream_id.to_string(),
            height: event.height,
            event_time: event.timestamp,
            lag,
            avg_speed,
            window_speed,
            percent: calc::percent_complete(event.height, range.first_height, range.last_height),
            eta: calc::eta(
                event.height,
                range.first_height,
                range.last_height,
                avg_speed,
            ),
        })
    }
}

/// One rendered line of the progress table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRow {
    pub stream_id: String,
    pub height: i64,
    pub event_time: DateTime<Utc>,
    /// Time since the event's own timestamp, whole seconds.
    pub lag: Duration,
    /// All-time events per second.
    pub avg_speed: f64,
    /// Events per second since the previous snapshot.
    pub window_speed: f64,
    pub percent: String,
    pub eta: Eta,
}

/// Per-stream progress table, owned by the aggregator loop.
#[derive(Debug, Default)]
pub struct ProgressStore {
    streams: BTreeMap<String, StreamProgress>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams seen so far.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn get(&self, stream_id: &str) -> Option<&StreamProgress> {
        self.streams.get(stream_id)
    }

    /// Replaces the known range of a stream, creating the stream if unseen.
    pub fn apply_range(&mut self, update: RangeUpdate, now: Instant) {
        self.streams
            .entry(update.stream_id)
            .or_insert_with(|| StreamProgress::new(now))
            .range = Some(update.range);
    }

    /// Records a processed event, creating the stream if unseen.
    pub fn apply_event(&mut self, event: ProcessedEvent) {
        let last = LastEvent {
            height: event.height,
            timestamp: event.timestamp,
        };

        // Lookup by &str first so known streams never reallocate the key.
        if let Some(progress) = self.streams.get_mut(event.stream_id.as_str()) {
            progress.last_event = Some(last);
            progress.messages_processed += 1;
            return;
        }

        let mut progress = StreamProgress::new(event.arrived_at);
        progress.last_event = Some(last);
        progress.messages_processed = 1;
        self.streams.insert(event.stream_id, progress);
    }

    /// Computes one row per eligible stream, ordered by stream id, and
    /// resets the speed window of every stream that produced a row.
    pub fn snapshot(&mut self, now: Instant, wall_now: DateTime<Utc>) -> Vec<ProgressRow> {
        self.streams
            .iter_mut()
            .filter_map(|(id, progress)| progress.snapshot(id, now, wall_now))
            .collect()
    }
}
