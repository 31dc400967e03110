//! umb-tail - follow a STOMP destination over mutually-authenticated TLS
//!
//! Connects to the broker, subscribes to one destination pattern and writes
//! every received message body to stdout until interrupted. Diagnostics go
//! to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use umb_tail::config::{ConfigOverrides, TailConfig};
use umb_tail::credentials::CredentialMaterial;
use umb_tail::delivery::{stdout_sink, OutputFormat, ReconnectPolicy, RunOutcome, RunSettings, Supervisor};
use umb_tail::error::{TailError, TailResult};
use umb_tail::observability::init_default_logging;
use umb_tail::transport::SecureTransport;

const DEFAULT_CONFIG_PATHS: &[&str] = &["umb-tail.toml", "/etc/umb-tail/umb-tail.toml"];

/// Tail a STOMP queue or topic over client-certificate TLS
#[derive(Parser)]
#[command(name = "umb-tail")]
#[command(about = "Tail a STOMP destination over mutually-authenticated TLS")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "UMB_TAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Broker endpoint, host:port or stomp+ssl://host:port
    #[arg(long, value_name = "ENDPOINT", env = "UMB_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// A PEM encoded certificate file
    #[arg(long, value_name = "FILE", global = true)]
    cert: Option<PathBuf>,

    /// A PEM encoded private key file
    #[arg(long, value_name = "FILE", global = true)]
    key: Option<PathBuf>,

    /// A PEM encoded CA's certificate file
    #[arg(long = "ca", alias = "CA", value_name = "FILE", global = true)]
    ca: Option<PathBuf>,

    /// A STOMP queue or topic pattern to subscribe to
    #[arg(long, value_name = "DESTINATION", global = true)]
    queue: Option<String>,

    /// Output format for message bodies (raw, json, log)
    #[arg(long, value_name = "FORMAT", global = true)]
    output: Option<OutputFormat>,

    /// Reconnect with backoff after recoverable failures
    #[arg(long, global = true)]
    reconnect: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe and print messages (default)
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);
    info!("Starting umb-tail v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e.diagnostic());
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_tail(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    match result {
        Ok(code) => {
            info!("Shutdown complete");
            process::exit(code);
        }
        Err(e) => {
            error!("{}", e.diagnostic());
            process::exit(1);
        }
    }
}

fn load_configuration(cli: &Cli) -> TailResult<TailConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            TailConfig::load_from_file(path)?
        }
        None => match DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
        {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                TailConfig::load_from_file(&path)?
            }
            None => TailConfig::default(),
        },
    };

    config.apply_overrides(ConfigOverrides {
        endpoint: cli.endpoint.clone(),
        cert_file: cli.cert.clone(),
        key_file: cli.key.clone(),
        ca_file: cli.ca.clone(),
        destination: cli.queue.clone(),
        output: cli.output,
        reconnect: cli.reconnect.then_some(true),
    });
    config.validate()?;
    Ok(config)
}

fn handle_config_command(config: &TailConfig, show: bool) -> TailResult<i32> {
    if show {
        let rendered = toml::to_string_pretty(config).map_err(|e| {
            TailError::Config(umb_tail::config::ConfigError::InvalidConfig(e.to_string()))
        })?;
        println!("{rendered}");
    }
    info!("Configuration is valid");
    Ok(0)
}

/// Turn SIGINT/SIGTERM into the shutdown flag
fn spawn_signal_handler(shutdown: watch::Sender<bool>) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        let _ = shutdown.send(true);
    });
    Ok(())
}

async fn run_tail(config: TailConfig) -> TailResult<i32> {
    let material = CredentialMaterial::load(&config.tls)?;
    let transport = SecureTransport::from_material(&material, config.transport_options())?;
    drop(material);

    let settings = RunSettings::from_config(&config)?;
    let policy = ReconnectPolicy::from_config(&config.reconnect);
    info!(
        endpoint = %settings.endpoint,
        destination = %settings.destination,
        output = %config.output.format,
        reconnect = policy.enabled,
        "Tailing destination"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = spawn_signal_handler(shutdown_tx) {
        warn!(error = %e, "Failed to install signal handlers");
    }

    let mut sink = stdout_sink(config.output.format);
    let supervisor = Supervisor::new(transport, settings, policy);
    match supervisor.run(sink.as_mut(), shutdown_rx).await? {
        RunOutcome::Shutdown { delivered } => {
            info!(delivered, "Stopped on request");
            Ok(0)
        }
        RunOutcome::EndOfFeed { delivered } => {
            error!(delivered, "stage=delivery error=subscription feed ended by broker");
            Ok(1)
        }
    }
}
