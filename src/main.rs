use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexwatch::agent::Agent;
use indexwatch::config::Config;
use indexwatch::demo::{DemoSource, DemoStream};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

/// Stream consumption progress and indexing health for indexers.
#[derive(Parser)]
#[command(name = "indexwatch", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,

    /// Drive synthetic streams through the full pipeline.
    Demo {
        /// Number of synthetic streams.
        #[arg(long, default_value_t = 3)]
        streams: usize,
    },
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("indexwatch {}", version::full());
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    // Logs go to stderr so they do not interleave with the progress table.
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let demo_streams = match cli.command {
        Some(Command::Demo { streams }) => Some(streams),
        _ => None,
    };

    let cfg = match (&cli.config, demo_streams) {
        (Some(path), _) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        (None, Some(_)) => Config::default(),
        (None, None) => anyhow::bail!("--config is required (use --help for usage)"),
    };

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting indexwatch",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg, demo_streams).await })
}

async fn run(cfg: Config, demo_streams: Option<usize>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    let mut agent = Agent::new(cfg)?;
    agent.start().await?;

    let demo_cancel = CancellationToken::new();
    let mut demo_tasks = Vec::new();
    if let Some(count) = demo_streams {
        let source = Arc::new(DemoSource::new(DemoStream::generate(count)));
        let reporter = agent.reporter();

        for stream in source.streams() {
            reporter
                .register_stream(&stream.stream_id, &stream.network)
                .with_context(|| format!("registering demo stream {}", stream.stream_id))?;
            agent.track_stream_with(&stream.stream_id, Arc::clone(&source));
        }

        demo_tasks = source.spawn(reporter, demo_cancel.clone());
        tracing::info!(streams = count, "demo streams started");
    }

    let _ = shutdown_rx.await;

    demo_cancel.cancel();
    for task in demo_tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "demo task join failed");
        }
    }

    agent.stop().await?;

    tracing::info!("indexwatch stopped");

    Ok(())
}
