use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::calc;

/// A processed-event notification for the health gauges.
#[derive(Debug, Clone)]
pub struct GaugeEvent {
    pub stream_id: String,
    /// Wall-clock time embedded in the event itself.
    pub timestamp: DateTime<Utc>,
    pub arrived_at: Instant,
}

/// Process-wide health values derived on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugeReading {
    /// Time since the stalest stream last received an event.
    pub processing_delay: Duration,
    /// Time since the oldest per-stream latest event timestamp.
    pub events_delay: Duration,
    /// Events per second of the slowest stream this tick.
    pub throughput: f64,
}

impl GaugeReading {
    /// Reported while no stream has produced an event yet.
    pub const IDLE: Self = Self {
        processing_delay: Duration::ZERO,
        events_delay: Duration::ZERO,
        throughput: 0.0,
    };
}

#[derive(Debug)]
struct StreamWindow {
    events: u64,
    last_event_time: DateTime<Utc>,
    last_arrival: Instant,
}

/// Reduces all active streams to worst-case gauge values.
///
/// The slowest or stalest stream always dominates: a single stalled stream
/// drags throughput to zero and pushes the delays up, instead of being
/// averaged away by healthy ones.
#[derive(Debug, Default)]
pub struct GaugeReducer {
    streams: HashMap<String, StreamWindow>,
}

impl GaugeReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams that have produced at least one event.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn record(&mut self, event: GaugeEvent) {
        if let Some(window) = self.streams.get_mut(event.stream_id.as_str()) {
            window.events += 1;
            window.last_event_time = event.timestamp;
            window.last_arrival = event.arrived_at;
            return;
        }

        self.streams.insert(
            event.stream_id,
            StreamWindow {
                events: 1,
                last_event_time: event.timestamp,
                last_arrival: event.arrived_at,
            },
        );
    }

    /// Computes the reading for a tick covering `window` and resets every
    /// stream's per-tick count.
    pub fn reduce(&mut self, now: Instant, wall_now: DateTime<Utc>, window: Duration) -> GaugeReading {
        if self.streams.is_empty() {
            return GaugeReading::IDLE;
        }

        let mut processing_delay = Duration::ZERO;
        let mut events_delay = Duration::ZERO;
        let mut min_events = u64::MAX;

        for stream in self.streams.values_mut() {
            processing_delay = processing_delay.max(now.saturating_duration_since(stream.last_arrival));
            events_delay = events_delay.max(
                (wall_now - stream.last_event_time)
                    .to_std()
                    .unwrap_or(Duration::ZERO),
            );
            min_events = min_events.min(stream.events);
            stream.events = 0;
        }

        GaugeReading {
            processing_delay,
            events_delay,
            throughput: calc::rate_per_sec(min_events, window),
        }
    }
}
