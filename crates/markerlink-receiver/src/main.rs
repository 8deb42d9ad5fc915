//! markerlink-receiver: answers the sender's offers, finds the marker in the
//! frames it receives and reports the position back once per connection.
//!
//! # Threads
//! ```text
//! tokio runtime     signaling, peer session callbacks, negotiator
//! marker-analysis   locates the marker, updates the shared coordinates
//! marker-preview    optional PNG snapshot of the latest frame (--preview)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use markerlink_core::{SessionConfig, SharedCoordinateState};
use markerlink_signaling::TcpSignaling;
use markerlink_webrtc::WebRtcSession;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod analysis;
mod context;
mod locator;
mod negotiator;
mod preview;

use analysis::{AnalysisWorker, WorkItem};
use context::ReceiverContext;
use locator::ColorCentroidLocator;
use negotiator::ReceiverNegotiator;
use preview::PreviewWriter;

#[derive(Parser, Debug)]
#[command(name = "markerlink-receiver")]
#[command(version, about = "Locates the sender's marker and reports it back", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, env = "MARKERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Host running markerlink-sender
    #[arg(long, env = "MARKERLINK_SIGNALING_HOST")]
    signaling_host: Option<String>,

    #[arg(long, env = "MARKERLINK_SIGNALING_PORT")]
    signaling_port: Option<u16>,

    /// Keep a PNG snapshot of the latest received frame at this path
    #[arg(long, env = "MARKERLINK_PREVIEW")]
    preview: Option<PathBuf>,

    /// Log at info level (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with_target(true)
        .with_thread_ids(false)
        .init();
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(host) = &args.signaling_host {
        config.signaling.host = host.clone();
    }
    if let Some(port) = args.signaling_port {
        config.signaling.port = port;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    info!("MarkerLink receiver v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    match run(config, args.preview).await {
        Ok(()) => {
            info!("MarkerLink receiver exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}

async fn run(config: SessionConfig, preview_path: Option<PathBuf>) -> Result<()> {
    // ── Shared state and the analysis thread ─────────────────────────────
    let coords = SharedCoordinateState::new();
    let (work_tx, work_rx) = mpsc::channel(config.analysis.queue_capacity);
    let worker = AnalysisWorker::spawn(
        work_rx,
        ColorCentroidLocator::from_config(&config),
        coords.clone(),
    )
    .context("starting analysis thread")?;
    let preview = preview_path
        .map(PreviewWriter::spawn)
        .transpose()
        .context("starting preview thread")?;

    let ctx = ReceiverContext::new(config.clone(), coords, work_tx, preview);

    // ── Negotiate until bye, error or Ctrl-C ─────────────────────────────
    let outcome = negotiate(&ctx, &config).await;

    // ── Orderly shutdown of the worker threads ───────────────────────────
    if ctx.work_tx.send(WorkItem::Stop).await.is_err() {
        warn!("Analysis thread already gone");
    }
    let shutdown_ctx = Arc::clone(&ctx);
    let stats = tokio::task::spawn_blocking(move || {
        if let Some(preview) = &shutdown_ctx.preview {
            preview.shutdown();
        }
        worker.join()
    })
    .await
    .context("joining worker threads")?;

    info!(
        frames_received = ctx.frames_received(),
        frames_analysed = stats.frames,
        frames_located = stats.located,
        max_queue_delay = ?stats.max_queue_delay,
        last = %ctx.coords.load(),
        "Receiver session finished"
    );
    outcome
}

async fn negotiate(ctx: &Arc<ReceiverContext>, config: &SessionConfig) -> Result<()> {
    let (signaling, session) = tokio::select! {
        parts = connect(config) => parts?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted before reaching the sender");
            return Ok(());
        }
    };

    let mut negotiator = ReceiverNegotiator::new(Arc::clone(ctx), session, signaling);
    let outcome = tokio::select! {
        result = negotiator.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };
    info!(
        state = ?negotiator.state(),
        rounds = negotiator.rounds(),
        coordinates_sent = negotiator.coordinates_sent(),
        "Negotiation ended"
    );
    negotiator.close().await;
    outcome
}

async fn connect(config: &SessionConfig) -> Result<(TcpSignaling, Arc<WebRtcSession>)> {
    let signaling = TcpSignaling::connect(
        &config.signaling.host,
        config.signaling.port,
        config.signaling.connect_retries,
        config.signaling.retry_interval(),
    )
    .await
    .context("connecting to the sender")?;
    let session = WebRtcSession::new(config)
        .await
        .context("creating peer session")?;
    Ok((signaling, session))
}
