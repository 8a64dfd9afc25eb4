//! filedrop-webrtc: share files with browsers over WebRTC data channels
//!
//! The sender registers a session with a filedrop relay, prints the
//! download links, and answers every receiver's offer until interrupted.
//! The relay only ever sees session descriptions, never file contents.
//!
//! Build with: cargo build -p filedrop-webrtc

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use filedrop_common::config::DEFAULT_RELAY_URL;
use filedrop_common::{
    ConnectionTracker, HttpRelay, Negotiator, Origin, RelayApi, SessionRegistry, SignalingPoller,
    UploaderConfig,
};

mod cli;
mod webrtc;

use crate::webrtc::common::DEFAULT_STUN_SERVER;
use crate::webrtc::WebRtcConnector;

#[derive(Parser)]
#[command(name = "filedrop-webrtc")]
#[command(about = "Peer-to-peer file sharing with browsers, signaled through a filedrop relay")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Share files until interrupted with Ctrl+C
    Send {
        /// Files to share
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Relay base URL
        #[arg(long, env = "FILEDROP_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
        relay: String,

        /// Origin used for the printed download links (defaults to the relay's)
        #[arg(long, env = "FILEDROP_ORIGIN", value_name = "URL")]
        origin: Option<String>,

        /// Session renewal interval in milliseconds
        #[arg(long, default_value_t = 5000)]
        renew_interval_ms: u64,

        /// Password receivers must supply
        #[arg(long)]
        password: Option<String>,

        /// STUN/TURN server URLs (can be specified multiple times)
        #[arg(long, value_name = "URL", default_values_t = [DEFAULT_STUN_SERVER.to_string()])]
        ice: Vec<String>,
    },
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime")
        .block_on(async_main());

    if let Err(e) = result {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with filters for noisy internal modules
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = format!("{},webrtc_ice=error,webrtc_sctp=warn,webrtc=warn", log_level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&filter)).init();

    match cli.command {
        Commands::Send {
            paths,
            relay,
            origin,
            renew_interval_ms,
            password,
            ice,
        } => {
            let origin = origin
                .map(|o| Origin::parse(&o))
                .transpose()
                .context("Invalid --origin")?;
            let config = UploaderConfig {
                relay_url: relay,
                origin,
                renew_interval: Duration::from_millis(renew_interval_ms.max(1)),
                ..Default::default()
            };
            send(config, paths, password, ice).await?;
        }
    }

    Ok(())
}

async fn send(
    config: UploaderConfig,
    paths: Vec<PathBuf>,
    password: Option<String>,
    ice_urls: Vec<String>,
) -> Result<()> {
    let mut draft = cli::build_draft(&paths, password)?;
    let origin = config
        .download_origin()
        .context("Cannot derive download origin from relay URL")?;

    let relay: Arc<dyn RelayApi> = Arc::new(
        HttpRelay::new(&config.relay_url, config.request_timeout)
            .context("Failed to set up relay client")?,
    );

    eprintln!("Connecting to relay {}...", config.relay_url);
    let registry = SessionRegistry::new(relay.clone());
    let session = registry
        .create_session()
        .await
        .context("Failed to create session at relay")?;
    draft.start()?;

    eprintln!("\nSharing {} file(s):", draft.files().len());
    for file in draft.files() {
        eprintln!("  {}", file.name);
    }
    if !draft.password().is_empty() {
        eprintln!("Password protection enabled");
    }
    eprintln!("\n--- Receiver Instructions ---");
    eprintln!("Long URL:  {}", session.long_url(&origin));
    eprintln!("Short URL: {}", session.short_url(&origin));
    eprintln!("\nWaiting for receivers (Ctrl+C to stop)...");

    let tracker = Arc::new(ConnectionTracker::new());
    let connector = Arc::new(WebRtcConnector::new(ice_urls));
    let negotiator = Arc::new(
        Negotiator::new(relay.clone(), connector.clone(), tracker.clone())
            .with_total_files(draft.files().len()),
    );
    let poller = SignalingPoller::new(relay, negotiator);
    let handle = poller.start(session, config.renew_interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    handle.cancel();
    connector.close_all().await;
    draft.stop();

    let summary = cli::summarize(&tracker);
    if summary.is_empty() {
        eprintln!("\nStopped. No receivers connected.");
    } else {
        eprintln!("\nStopped. Receivers:");
        for line in summary {
            eprintln!("  {}", line);
        }
    }
    Ok(())
}
