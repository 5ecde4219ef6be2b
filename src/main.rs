//! MQTT Replicator - topic replication bridge between two MQTT brokers
//!
//! Usage:
//!   mqtt-replicator [OPTIONS] [COMMAND]
//!
//! Commands:
//!   run      Replicate the configured patterns (default)
//!   probe    Measure first-message latency per pattern on the source broker
//!   loadgen  Publish a synthetic topic tree at a fixed rate
//!
//! Options:
//!   -c, --config <FILE>         Configuration file path
//!   -l, --log-level <LEVEL>     Log level (error, warn, info, debug, trace)
//!   --source <HOST:PORT>        Source broker address
//!   --destination <HOST:PORT>   Destination broker address
//!   -h, --help                  Print help

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mqtt_replicator::config::{BrokerEndpointConfig, Config};
use mqtt_replicator::endpoint::DestinationEndpoint;
use mqtt_replicator::probe::{run_probe, FirstMessageProbe};
use mqtt_replicator::shutdown::{self, ShutdownHandle};
use mqtt_replicator::{loadgen, Bridge, RumqttConnector};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// Broker the load generator publishes to
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Target {
    #[default]
    Source,
    Destination,
}

#[derive(Subcommand, Debug, Default)]
enum Command {
    /// Replicate the configured patterns from source to destination
    #[default]
    Run,
    /// Measure time to first message per pattern on the source broker
    Probe,
    /// Publish a synthetic topic tree at a fixed rate
    Loadgen {
        /// Broker to publish to
        #[arg(long, value_enum, default_value_t = Target::Source)]
        target: Target,
    },
}

/// MQTT Replicator - topic replication bridge
#[derive(Parser, Debug)]
#[command(name = "mqtt-replicator")]
#[command(author = "MQTT Replicator Contributors")]
#[command(version)]
#[command(about = "Replicates MQTT topics from one broker to another")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Source broker address (host or host:port)
    #[arg(long)]
    source: Option<String>,

    /// Destination broker address (host or host:port)
    #[arg(long)]
    destination: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    // CLI args override file config
    if let Some(source) = &args.source {
        config.source.set_address(source);
    }
    if let Some(destination) = &args.destination {
        config.destination.set_address(destination);
    }
    config.validate()?;
    Ok(config)
}

fn spawn_ctrl_c(handle: ShutdownHandle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt, shutting down"),
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
        handle.trigger();
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // CLI overrides config, config overrides default (info)
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error installing logger: {}", e);
        return ExitCode::FAILURE;
    }

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let connector = RumqttConnector::new();
    let (handle, mut shutdown) = shutdown::channel();
    spawn_ctrl_c(handle);

    match args.command.unwrap_or_default() {
        Command::Run => {
            let bridge = match Bridge::start(&config, &connector).await {
                Ok(bridge) => bridge,
                Err(e) => {
                    error!("Failed to start bridge: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            shutdown.wait().await;
            bridge.shutdown().await;
            ExitCode::SUCCESS
        }
        Command::Probe => {
            let probe = match FirstMessageProbe::from_config(&config.probe, &config.relay.patterns) {
                Ok(probe) => Arc::new(probe),
                Err(e) => {
                    error!("Invalid probe pattern: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            match run_probe(
                config.source.clone(),
                probe,
                &connector,
                config.probe.timeout,
                shutdown,
            )
            .await
            {
                Ok(results) if results.iter().all(|r| r.latency.is_some()) => ExitCode::SUCCESS,
                Ok(_) => ExitCode::from(2),
                Err(e) => {
                    error!("Probe failed: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Command::Loadgen { target } => {
            let endpoint: BrokerEndpointConfig = match target {
                Target::Source => config.source.clone(),
                Target::Destination => config.destination.clone(),
            };
            let destination = match DestinationEndpoint::builder(endpoint)
                .ack_timeout(config.relay.ack_timeout)
                .start(&connector)
            {
                Ok(destination) => Arc::new(destination),
                Err(e) => {
                    error!("Failed to start load generator: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            loadgen::run_loadgen(&config.loadgen, destination.clone(), shutdown).await;
            destination.stop().await;
            ExitCode::SUCCESS
        }
    }
}
