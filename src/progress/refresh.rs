use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use prometheus::IntCounter;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::store::StreamRange;
use super::{IngestError, ProgressHandle};
use crate::config::RangeSourceConfig;

/// Errors from looking up a stream's offset range.
#[derive(Error, Debug)]
pub enum RangeLookupError {
    #[error("stream {0} not found")]
    NotFound(String),

    #[error("stream {0} reports no end offset")]
    NoOffsets(String),

    #[error("unexpected status {status} for stream {stream_id}")]
    Status {
        stream_id: String,
        status: reqwest::StatusCode,
    },

    #[error("range request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Source of stream offset ranges.
pub trait RangeSource: Send + Sync {
    /// Looks up the current first and last offset heights of a stream.
    fn lookup_range(
        &self,
        stream_id: &str,
    ) -> impl std::future::Future<Output = Result<StreamRange, RangeLookupError>> + Send;
}

/// Stream registry client that derives ranges from per-endpoint offset
/// stats.
pub struct HttpRangeSource {
    http: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpRangeSource {
    pub fn new(cfg: &RangeSourceConfig) -> anyhow::Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        let endpoint = reqwest::Url::parse(&cfg.endpoint)
            .with_context(|| format!("parsing range source endpoint {:?}", cfg.endpoint))?;
        if endpoint.cannot_be_a_base() {
            anyhow::bail!("range source endpoint {:?} cannot carry a path", cfg.endpoint);
        }

        Ok(Self { http, endpoint })
    }

    /// `<endpoint>/streams/<stream_id>`, with the id as one escaped path
    /// segment.
    fn stream_url(&self, stream_id: &str) -> reqwest::Url {
        let mut url = self.endpoint.clone();
        // Base URLs always have path segments (checked in `new`).
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("streams").push(stream_id);
        }
        url
    }
}

// --- JSON response structures ---

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    endpoints: Vec<EndpointInfo>,
}

#[derive(Deserialize)]
struct EndpointInfo {
    #[serde(default)]
    stats: Option<EndpointStats>,
}

#[derive(Deserialize)]
struct EndpointStats {
    #[serde(default)]
    start_offset: Option<OffsetInfo>,
    #[serde(default)]
    end_offset: Option<OffsetInfo>,
}

#[derive(Deserialize)]
struct OffsetInfo {
    height: i64,
}

impl RangeSource for HttpRangeSource {
    async fn lookup_range(&self, stream_id: &str) -> Result<StreamRange, RangeLookupError> {
        debug!(stream = stream_id, "looking up stream range");

        let response = self
            .http
            .get(self.stream_url(stream_id))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RangeLookupError::NotFound(stream_id.to_string()));
        }
        if !status.is_success() {
            return Err(RangeLookupError::Status {
                stream_id: stream_id.to_string(),
                status,
            });
        }

        let body: StreamResponse = response.json().await?;

        range_from_endpoints(&body.endpoints)
            .ok_or_else(|| RangeLookupError::NoOffsets(stream_id.to_string()))
    }
}

/// Reduces endpoint stats to one range: the lowest start and the highest
/// end across all endpoints. Missing starts default to height 0.
fn range_from_endpoints(endpoints: &[EndpointInfo]) -> Option<StreamRange> {
    let stats = endpoints.iter().filter_map(|e| e.stats.as_ref());

    let last_height = stats
        .clone()
        .filter_map(|s| s.end_offset.as_ref())
        .map(|o| o.height)
        .max()?;

    let first_height = stats
        .filter_map(|s| s.start_offset.as_ref())
        .map(|o| o.height)
        .min()
        .unwrap_or(0)
        .clamp(0, last_height.max(0));

    Some(StreamRange {
        first_height,
        last_height: last_height.max(first_height),
    })
}

/// Polls `source` every `interval` and forwards each range to the tracker.
///
/// Failed lookups are logged and counted; the tracker keeps the last good
/// range. Each stream gets its own task, so a slow source only delays that
/// stream.
pub(crate) fn spawn_refresher<S: RangeSource + 'static>(
    handle: ProgressHandle,
    stream_id: String,
    source: Arc<S>,
    interval: Duration,
    ctx: CancellationToken,
    lookup_errors: Option<IntCounter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let lookup = tokio::select! {
                _ = ctx.cancelled() => break,
                lookup = source.lookup_range(&stream_id) => lookup,
            };

            let range = match lookup {
                Ok(range) => range,
                Err(e) => {
                    warn!(stream = %stream_id, error = %e, "stream range lookup failed");
                    if let Some(counter) = &lookup_errors {
                        counter.inc();
                    }
                    continue;
                }
            };

            let submitted = tokio::select! {
                _ = ctx.cancelled() => break,
                submitted = handle.submit_range(
                    stream_id.as_str(),
                    range.first_height,
                    range.last_height,
                ) => submitted,
            };

            match submitted {
                Ok(()) => debug!(
                    stream = %stream_id,
                    first = range.first_height,
                    last = range.last_height,
                    "stream range refreshed",
                ),
                Err(IngestError::Closed) => break,
                Err(e) => {
                    warn!(stream = %stream_id, error = %e, "discarding invalid stream range");
                    if let Some(counter) = &lookup_errors {
                        counter.inc();
                    }
                }
            }
        }

        debug!(stream = %stream_id, "range refresher stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::config::ProgressConfig;
    use crate::progress::ProgressTracker;

    fn endpoint(start: Option<i64>, end: Option<i64>) -> EndpointInfo {
        EndpointInfo {
            stats: Some(EndpointStats {
                start_offset: start.map(|height| OffsetInfo { height }),
                end_offset: end.map(|height| OffsetInfo { height }),
            }),
        }
    }

    #[test]
    fn test_range_from_endpoints_takes_widest() {
        let range = range_from_endpoints(&[
            endpoint(Some(10), Some(500)),
            endpoint(Some(3), Some(900)),
            EndpointInfo { stats: None },
        ]);
        assert_eq!(
            range,
            Some(StreamRange {
                first_height: 3,
                last_height: 900
            })
        );
    }

    #[test]
    fn test_range_from_endpoints_without_end() {
        assert_eq!(range_from_endpoints(&[endpoint(Some(1), None)]), None);
        assert_eq!(range_from_endpoints(&[]), None);
    }

    #[test]
    fn test_range_from_endpoints_missing_start() {
        let range = range_from_endpoints(&[endpoint(None, Some(42))]);
        assert_eq!(
            range,
            Some(StreamRange {
                first_height: 0,
                last_height: 42
            })
        );
    }

    #[test]
    fn test_stream_response_parses() {
        let body = r#"{
            "endpoints": [
                {"stats": {"start_offset": {"height": 7}, "end_offset": {"height": 70}}},
                {"stats": {"end_offset": {"height": 75}}}
            ]
        }"#;
        let resp: StreamResponse = serde_json::from_str(body).expect("valid json");
        assert_eq!(
            range_from_endpoints(&resp.endpoints),
            Some(StreamRange {
                first_height: 7,
                last_height: 75
            })
        );
    }

    fn http_source(endpoint: &str) -> HttpRangeSource {
        HttpRangeSource::new(&RangeSourceConfig {
            endpoint: endpoint.to_string(),
            timeout: Duration::from_secs(1),
        })
        .expect("range source")
    }

    #[test]
    fn test_stream_url_escapes_stream_id() {
        let source = http_source("http://registry.local:8080");

        let url = source.stream_url("x?y");
        assert_eq!(url.path(), "/streams/x%3Fy");
        assert_eq!(url.query(), None);

        let url = source.stream_url("s#1");
        assert_eq!(url.path(), "/streams/s%231");
        assert_eq!(url.fragment(), None);

        let url = source.stream_url("a/b");
        assert_eq!(url.path(), "/streams/a%2Fb");
    }

    #[test]
    fn test_stream_url_keeps_endpoint_path() {
        let source = http_source("https://registry.local/api/v1/");
        assert_eq!(
            source.stream_url("s1").as_str(),
            "https://registry.local/api/v1/streams/s1"
        );
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let cfg = RangeSourceConfig {
            endpoint: "not a url".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(HttpRangeSource::new(&cfg).is_err());
    }

    /// Fails on the first call, then reports a growing range.
    struct FlakySource {
        calls: AtomicU32,
    }

    impl RangeSource for FlakySource {
        async fn lookup_range(&self, stream_id: &str) -> Result<StreamRange, RangeLookupError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                return Err(RangeLookupError::NotFound(stream_id.to_string()));
            }
            Ok(StreamRange {
                first_height: 0,
                last_height: i64::from(call) * 100,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_retries_after_failure() {
        let cfg = ProgressConfig {
            range_refresh_interval: Duration::from_secs(5),
            ..Default::default()
        };
        let mut tracker = ProgressTracker::new(&cfg);
        let mut range_rx = tracker.range_rx.take().expect("receiver");
        let counter = IntCounter::new("lookup_errors", "test").expect("counter");

        let ctx = CancellationToken::new();
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(0),
        });
        let task = spawn_refresher(
            tracker.handle(),
            "s1".to_string(),
            Arc::clone(&source),
            cfg.range_refresh_interval,
            ctx.clone(),
            Some(counter.clone()),
        );

        let update = range_rx.recv().await.expect("range update");
        assert_eq!(update.stream_id, "s1");
        assert_eq!(update.range.last_height, 100);
        assert_eq!(counter.get(), 1);

        let update = range_rx.recv().await.expect("range update");
        assert_eq!(update.range.last_height, 200);

        ctx.cancel();
        task.await.expect("refresher task");
    }

    /// Never answers.
    struct StalledSource;

    impl RangeSource for StalledSource {
        async fn lookup_range(&self, _stream_id: &str) -> Result<StreamRange, RangeLookupError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_lookup_is_cancellable() {
        let tracker = ProgressTracker::new(&ProgressConfig::default());
        let ctx = CancellationToken::new();
        let task = tracker.spawn_range_refresher("s1", Arc::new(StalledSource), ctx.clone());

        tokio::time::sleep(Duration::from_secs(60)).await;
        ctx.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("refresher should stop on cancel")
            .expect("refresher task");
    }
}
