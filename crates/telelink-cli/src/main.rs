//! Command-line interface for telelink.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use telelink_core::config::env_vars;
use telelink_core::{Error, LinkConfig, PacketSink, TmPacket};
use telelink_devices::{DataLink, DeviceFactory, DeviceMetadata, LoggingLinkManager};
use tracing::{debug, info};

/// Telelink - discover MQTT devices and route their telemetry.
#[derive(Parser, Debug)]
#[command(name = "telelink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the broker and route telemetry until Ctrl-C.
    Run {
        /// Path to the TOML configuration file.
        #[arg(short, long, default_value = "telelink.toml")]
        config: PathBuf,
    },
    /// Validate a metadata payload read from a file, or stdin with `-`.
    CheckMetadata {
        #[arg(required = true)]
        path: PathBuf,
    },
    /// List the supported device types.
    DeviceTypes,
}

/// Logs every packet that reaches the end of the pipeline.
#[derive(Default)]
struct LoggingSink {
    packets: AtomicU64,
}

impl PacketSink for LoggingSink {
    fn accept(&self, packet: TmPacket) {
        let count = self.packets.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            link = %packet.link,
            bytes = packet.len(),
            seq_count = ?packet.seq_count,
            "Telemetry packet #{}",
            count
        );
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Run { config } => run(&config).await,
        Command::CheckMetadata { path } => check_metadata(&path),
        Command::DeviceTypes => {
            for device_type in DeviceFactory::new().supported_types() {
                println!("{}", device_type);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("warn,telelink={}", default_level))
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(config_path: &Path) -> Result<ExitCode> {
    let config = LinkConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    info!(
        "Starting link {} against {}",
        config.name,
        config.mqtt.broker_addr()
    );

    let sink = Arc::new(LoggingSink::default());
    let link = DataLink::builder(config)
        .factory(Arc::new(DeviceFactory::new()))
        .link_manager(Arc::new(LoggingLinkManager::new()))
        .sink(sink.clone())
        .build()?;

    link.start().await.context("Failed to start link")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    let devices = link.sub_links().len();
    link.stop().await;
    info!(
        "Stopped after {} packets from {} devices",
        sink.packets.load(Ordering::Relaxed),
        devices
    );
    Ok(ExitCode::SUCCESS)
}

fn check_metadata(path: &Path) -> Result<ExitCode> {
    let payload = if path.as_os_str() == "-" {
        let mut payload = Vec::new();
        std::io::stdin()
            .read_to_end(&mut payload)
            .context("Failed to read stdin")?;
        payload
    } else {
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
    };

    match DeviceMetadata::parse(&payload) {
        Ok(metadata) => {
            println!("valid");
            debug!(
                "frequency={:?} status={:?} long_status={:?}",
                metadata.frequency(),
                metadata.status_str(),
                metadata.long_status()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(Error::Validation(reason)) => {
            println!("invalid: {}", reason);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}
