//! netwarden: online network-traffic anomaly detection.
//!
//! Captures live traffic, batches decoded TCP/UDP packets into
//! fixed-time windows, derives per-window statistical flow features,
//! and scores every packet against a pretrained clustering model.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐      ┌──────────────┐      ┌────────────────────┐
//! │   Capture   │─────>│ WindowBuffer │─────>│ Aggregator + Scorer│
//! │  (pcap)     │ push │  (mutex)     │ swap │  (timer tick)      │
//! └─────────────┘      └──────────────┘      └────────────────────┘
//!     Thread                shared                  Async
//! ```
//!
//! - **Capture**: Background thread using libpcap for packet sniffing
//! - **WindowBuffer**: Mutex-guarded batch, swapped atomically per tick
//! - **Aggregator/Scorer**: Per-window features + centroid-distance rule

mod capture;
mod config;
mod error;
mod features;
mod model;
mod pipeline;
mod report;
mod scorer;
mod window;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pcap::Capture;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::capture::{decode_packet, list_devices, PacketRecord};
use crate::config::Config;
use crate::features::aggregate;
use crate::model::ModelArtifact;
use crate::report::WindowReport;
use crate::scorer::score_window;

/// Exit status for a missing or incompatible model artifact, distinct
/// from the generic failure status 1.
const EXIT_MODEL_ERROR: i32 = 2;

/// netwarden: flag anomalous traffic by distance to trained cluster centroids.
#[derive(Parser, Debug)]
#[command(name = "netwarden")]
#[command(version = "0.1.0")]
#[command(about = "Online network-traffic anomaly detection against a pretrained clustering model")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture live traffic and score it window by window.
    Watch {
        /// Network interface to capture on (default: auto-detect).
        #[arg(short, long)]
        interface: Option<String>,

        /// BPF filter expression (e.g., "tcp or udp").
        #[arg(short, long)]
        filter: Option<String>,

        /// Path to the model artifact (JSON bundle).
        #[arg(short, long)]
        model: Option<String>,

        /// Path to a TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Aggregation interval in seconds.
        #[arg(short = 'n', long)]
        interval: Option<u64>,

        /// Report format: text, json.
        #[arg(long)]
        format: Option<String>,

        /// Enable verbose logging (writes to stderr).
        #[arg(short, long)]
        verbose: bool,
    },

    /// List available network interfaces.
    ListInterfaces,

    /// Score a PCAP file offline using the same window pipeline.
    Analyze {
        /// Path to the PCAP file.
        #[arg(long)]
        file: String,

        /// Path to the model artifact (JSON bundle).
        #[arg(short, long)]
        model: Option<String>,

        /// Path to a TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Aggregation interval in seconds.
        #[arg(short = 'n', long)]
        interval: Option<u64>,

        /// Report format: text, json.
        #[arg(long)]
        format: Option<String>,

        /// Enable verbose logging (writes to stderr).
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            interface,
            filter,
            model,
            config,
            interval,
            format,
            verbose,
        } => {
            let config = build_config(
                config.as_deref(),
                interface,
                filter,
                model,
                interval,
                format,
                verbose,
            )?;
            init_logging(config.output.verbose)?;

            let artifact = load_artifact_or_exit(&config.model.path);
            println!(
                "Loaded model: {} centroids, decision threshold {}",
                artifact.centroids.len(),
                artifact.threshold
            );

            pipeline::run(&config, &artifact).await?;
            info!("netwarden stopped");
            Ok(())
        }

        Commands::ListInterfaces => {
            let devices = list_devices()?;
            println!("Available network interfaces:\n");
            for device in devices {
                let desc = device
                    .desc
                    .as_ref()
                    .map(|d| format!(" ({})", d))
                    .unwrap_or_default();
                println!("  {}{}", device.name, desc);

                for addr in &device.addresses {
                    println!("    - {}", addr.addr);
                }
            }
            Ok(())
        }

        Commands::Analyze {
            file,
            model,
            config,
            interval,
            format,
            verbose,
        } => {
            let config = build_config(
                config.as_deref(),
                None,
                None,
                model,
                interval,
                format,
                verbose,
            )?;
            init_logging(config.output.verbose)?;

            let artifact = load_artifact_or_exit(&config.model.path);
            run_offline_analysis(&file, &config, &artifact)
        }
    }
}

/// Loads the optional config file and applies CLI overrides on top.
fn build_config(
    path: Option<&Path>,
    interface: Option<String>,
    filter: Option<String>,
    model: Option<String>,
    interval: Option<u64>,
    format: Option<String>,
    verbose: bool,
) -> Result<Config> {
    let mut config = Config::load_or_default(path);

    if interface.is_some() {
        config.capture.interface = interface;
    }
    if filter.is_some() {
        config.capture.filter = filter;
    }
    if let Some(model) = model {
        config.model.path = model;
    }
    if let Some(interval) = interval {
        config.window.interval_secs = interval;
    }
    if let Some(format) = format {
        config.output.format = format
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("Invalid report format")?;
    }
    if verbose {
        config.output.verbose = true;
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// A missing, unreadable, or schema-incompatible artifact is a fatal
/// startup error with its own exit status.
fn load_artifact_or_exit(path: &str) -> ModelArtifact {
    match ModelArtifact::load(Path::new(path)) {
        Ok(artifact) => artifact,
        Err(e) => {
            error!("{:#}", anyhow::Error::from(e));
            std::process::exit(EXIT_MODEL_ERROR);
        }
    }
}

/// Replays a PCAP file through the same aggregate-and-score path,
/// partitioning records into fixed windows by capture timestamp.
fn run_offline_analysis(file: &str, config: &Config, artifact: &ModelArtifact) -> Result<()> {
    let mut cap = Capture::from_file(file).context("Failed to open PCAP file")?;
    let sentinel = config.features.sentinel_port;

    let mut records: Vec<PacketRecord> = Vec::new();
    while let Ok(packet) = cap.next_packet() {
        let nanos = (packet.header.ts.tv_usec as u32).saturating_mul(1000);
        let Some(timestamp) = chrono::DateTime::from_timestamp(packet.header.ts.tv_sec, nanos)
        else {
            continue;
        };
        if let Some(record) = decode_packet(packet.data, timestamp, sentinel) {
            records.push(record);
        }
    }

    if records.is_empty() {
        println!("No TCP/UDP packets found in {}", file);
        return Ok(());
    }

    records.sort_by_key(|r| r.timestamp);
    let window_ms = (config.window.interval_secs * 1000) as i64;
    let start = records[0].timestamp;

    let mut windows: Vec<Vec<PacketRecord>> = Vec::new();
    for record in records {
        let index = (record
            .timestamp
            .signed_duration_since(start)
            .num_milliseconds()
            / window_ms) as usize;
        if windows.len() <= index {
            windows.resize_with(index + 1, Vec::new);
        }
        windows[index].push(record);
    }

    info!(
        "Scoring {} windows of {}s from {}",
        windows.iter().filter(|w| !w.is_empty()).count(),
        config.window.interval_secs,
        file
    );

    let feature_cfg = pipeline::feature_config(config);
    for mut batch in windows.into_iter().filter(|w| !w.is_empty()) {
        let window_start = batch[0].timestamp;
        let features = aggregate(&mut batch, &feature_cfg);
        let verdict = score_window(&batch, &features, artifact)?;
        WindowReport::new(window_start, &verdict, artifact.threshold).emit(config.output.format);
    }

    Ok(())
}
