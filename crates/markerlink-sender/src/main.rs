//! markerlink-sender: paints a marker, streams it to the receiver and keeps
//! renegotiating with the marker moved a step further each round.
//!
//! # Usage
//! ```text
//! markerlink-sender [--config markerlink.json] [--signaling-host 0.0.0.0] [-v]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use markerlink_core::SessionConfig;
use markerlink_signaling::TcpSignaling;
use markerlink_webrtc::WebRtcSession;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod negotiator;
mod pacer;
mod track;

use negotiator::SenderNegotiator;

#[derive(Parser, Debug)]
#[command(name = "markerlink-sender")]
#[command(version, about = "Streams a moving marker over a peer session", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, env = "MARKERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Address to accept the receiver's signaling connection on
    #[arg(long, env = "MARKERLINK_SIGNALING_HOST")]
    signaling_host: Option<String>,

    #[arg(long, env = "MARKERLINK_SIGNALING_PORT")]
    signaling_port: Option<u16>,

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
    info!("MarkerLink sender v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    match run(config).await {
        Ok(()) => {
            info!("MarkerLink sender exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}

async fn run(config: SessionConfig) -> Result<()> {
    let (signaling, session) = tokio::select! {
        parts = connect(&config) => parts?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted before the receiver connected");
            return Ok(());
        }
    };

    let mut negotiator = SenderNegotiator::new(session, signaling, config);
    let outcome = tokio::select! {
        result = negotiator.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };
    info!(
        state = ?negotiator.state(),
        position = ?negotiator.position(),
        rounds = negotiator.rounds(),
        "Negotiation ended"
    );
    negotiator.close().await;
    outcome
}

async fn connect(config: &SessionConfig) -> Result<(TcpSignaling, Arc<WebRtcSession>)> {
    let signaling = TcpSignaling::listen(&config.signaling.host, config.signaling.port)
        .await
        .context("waiting for the receiver to connect")?;
    let session = WebRtcSession::new(config)
        .await
        .context("creating peer session")?;
    Ok((signaling, session))
}
