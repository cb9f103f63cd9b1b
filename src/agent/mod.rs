pub mod reporter;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::export::{HttpServer, IndexMetrics};
use crate::gauge::GaugeTracker;
use crate::progress::refresh::{HttpRangeSource, RangeSource};
use crate::progress::table::{ProgressRenderer, TableRenderer};
use crate::progress::ProgressTracker;
use crate::status::StatusStore;

pub use self::reporter::Reporter;

/// Agent orchestrates all components: progress table, health gauges,
/// status store, range refreshers and the HTTP server.
pub struct Agent {
    metrics: Arc<IndexMetrics>,
    status: Arc<StatusStore>,
    server: HttpServer,
    progress: Option<ProgressTracker>,
    gauges: Option<GaugeTracker>,
    range_source: Option<Arc<HttpRangeSource>>,
    renderer: Option<Box<dyn ProgressRenderer>>,
    refreshers: Vec<tokio::task::JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent with its own metrics registry. Fails on an
    /// invalid configuration.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate().context("invalid configuration")?;

        let registry = Registry::new();
        let metrics = Arc::new(IndexMetrics::new(&registry).context("creating index metrics")?);
        let status = Arc::new(StatusStore::new());

        let server = HttpServer::new(
            &cfg.server.addr,
            registry,
            Arc::clone(&status),
            metrics.status_updates_rejected.clone(),
        );

        let progress = cfg
            .progress
            .enabled
            .then(|| ProgressTracker::new(&cfg.progress).with_metrics(Arc::clone(&metrics)));

        let gauges = cfg
            .gauges
            .enabled
            .then(|| GaugeTracker::new(&cfg.gauges, Arc::clone(&metrics)));

        let range_source = if cfg.range_source.endpoint.is_empty() {
            None
        } else {
            Some(Arc::new(
                HttpRangeSource::new(&cfg.range_source).context("creating range source")?,
            ))
        };

        Ok(Self {
            metrics,
            status,
            server,
            progress,
            gauges,
            range_source,
            renderer: None,
            refreshers: Vec::new(),
            local_addr: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Replaces the stdout table renderer. Must be called before `start`.
    pub fn with_renderer(mut self, renderer: Box<dyn ProgressRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Start all components.
    pub async fn start(&mut self) -> Result<()> {
        let local_addr = self
            .server
            .start()
            .await
            .context("starting http server")?;
        self.local_addr = Some(local_addr);

        if let Some(progress) = &mut self.progress {
            let renderer: Box<dyn ProgressRenderer> = match self.renderer.take() {
                Some(renderer) => renderer,
                None => Box::new(TableRenderer::new(std::io::stdout())),
            };
            progress
                .start(renderer, self.cancel.child_token())
                .await
                .context("starting progress tracker")?;
        }

        if let Some(gauges) = &mut self.gauges {
            gauges
                .start(self.cancel.child_token())
                .await
                .context("starting gauge tracker")?;
        }

        info!(
            addr = %local_addr,
            progress = self.progress.is_some(),
            gauges = self.gauges.is_some(),
            "agent started"
        );

        Ok(())
    }

    /// Address the HTTP server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn metrics(&self) -> &Arc<IndexMetrics> {
        &self.metrics
    }

    pub fn status(&self) -> &Arc<StatusStore> {
        &self.status
    }

    /// Returns a handle for the consumer to report processed events and
    /// stream status.
    pub fn reporter(&self) -> Reporter {
        Reporter::new(
            self.progress.as_ref().map(ProgressTracker::handle),
            self.gauges.as_ref().map(GaugeTracker::handle),
            Arc::clone(&self.status),
        )
    }

    /// Keeps the offset range of `stream_id` fresh using the configured
    /// stream registry. No-op without a registry endpoint.
    pub fn track_stream(&mut self, stream_id: &str) {
        match self.range_source.clone() {
            Some(source) => self.track_stream_with(stream_id, source),
            None => warn!(
                stream = stream_id,
                "no range_source.endpoint configured, progress will not be rendered"
            ),
        }
    }

    /// Keeps the offset range of `stream_id` fresh using `source`.
    pub fn track_stream_with<S: RangeSource + 'static>(&mut self, stream_id: &str, source: Arc<S>) {
        let Some(progress) = &self.progress else {
            return;
        };
        let task = progress.spawn_range_refresher(stream_id, source, self.cancel.child_token());
        self.refreshers.push(task);
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        // Signal all background tasks to stop.
        self.cancel.cancel();

        if let Some(progress) = &self.progress {
            progress.wait_for_shutdown().await;
        }
        if let Some(gauges) = &self.gauges {
            gauges.wait_for_shutdown().await;
        }
        for task in self.refreshers.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "range refresher task join failed");
            }
        }

        self.server.stop().await?;

        info!("agent stopped");

        Ok(())
    }
}
