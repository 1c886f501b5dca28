use std::path::{Path, PathBuf};

use anyhow::Context as _;
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

mod config;
mod detection;
mod error;
mod feedback;
mod guidance;
mod manager;
mod messages;
mod registry;
mod transport;

const DEFAULT_CONFIG: &str = "config.toml";

/// Guides a hand toward a target object with haptic feedback.
///
/// Detector output is read from stdin as one JSON object per frame.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minimum detection confidence, overrides the config file
    #[arg(long)]
    min_confidence: Option<f32>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| default.to_string());
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&filters)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<config::AppConfig> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG).exists() => Path::new(DEFAULT_CONFIG),
        None => {
            info!("No {} found, using defaults", DEFAULT_CONFIG);
            return Ok(config::AppConfig::default());
        }
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::de::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(args.config.as_deref())?;
    let device = config.device.unwrap_or_default();
    let scan = config.scan.unwrap_or_default();
    let feedback = config.feedback.unwrap_or_default();
    let mut detection = config.detection.unwrap_or_default();
    if args.min_confidence.is_some() {
        detection.min_confidence = args.min_confidence;
    }

    let bt_manager = Manager::new()
        .await
        .context("starting bluetooth manager")?;

    // get the first bluetooth adapter
    let adapters = bt_manager.adapters().await?;
    let central = adapters
        .into_iter()
        .next()
        .context("no bluetooth adapter found")?;

    let (connection, link) =
        manager::ConnectionManager::new(transport::BtleTransport::new(central), &device, &scan);
    let channel = feedback::FeedbackChannel::new(feedback.queue_capacity());
    let dispatcher =
        feedback::FeedbackDispatcher::new(channel.clone(), link, feedback.poll_interval());
    let sink = detection::DetectionSink::new(&detection, channel);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connection_task = tokio::spawn(connection.run(shutdown_rx.clone()));
    let dispatcher_task = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });

    // stdin reads block, and the detector never waits on us
    std::thread::spawn(move || sink.run(std::io::stdin().lock()));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("Shutting down");
    shutdown_tx.send_replace(true);

    for (name, task) in [("connection manager", connection_task), ("dispatcher", dispatcher_task)] {
        if let Err(err) = task.await {
            error!("Error joining {}: {:?}", name, err);
        }
    }

    Ok(())
}
