//! slackircd - Main binary

use clap::{Parser, Subcommand};
use slackircd_core::remote::slack::SlackConnector;
use slackircd_core::{Config, Server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// slackircd - An IRC gateway to team-chat workspaces
#[derive(Parser)]
#[command(name = "slackircd")]
#[command(about = "An IRC gateway to team-chat workspaces")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    /// Listen address, overrides the configuration
    #[arg(long)]
    listen: Option<String>,

    /// Server name, overrides the configuration
    #[arg(long)]
    server_name: Option<String>,

    /// Static workspace API key; clients may send one with PASS instead
    #[arg(long, env = "SLACKIRCD_API_KEY")]
    api_key: Option<String>,

    /// Page size of paginated workspace listings
    #[arg(long)]
    pagination: Option<usize>,

    /// Maximum bytes of message text per relayed line
    #[arg(long)]
    chunk_size: Option<usize>,

    /// TLS certificate (PEM); enables TLS together with --tls-key
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// TLS private key (PEM, PKCS#8)
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if let Some(command) = &cli.command {
        match command {
            Commands::Config { output } => {
                generate_config(output)?;
                return Ok(());
            }
            Commands::Version => {
                show_version();
                return Ok(());
            }
        }
    }

    let mut config = if cli.config.exists() {
        info!("Loading configuration from {:?}", cli.config);
        Config::from_file(&cli.config)?
    } else {
        info!("Configuration file not found, using defaults");
        Config::default()
    };
    apply_overrides(&mut config, &cli);

    if cli.test_config {
        config.validate()?;
        info!("Configuration is valid");
        return Ok(());
    }

    config.validate()?;

    let connector = SlackConnector::new(&config.workspace)?;
    let mut server = Server::new(config, Arc::new(connector));
    server.init().await?;

    info!("Starting slackircd...");
    server.start().await?;

    Ok(())
}

/// Command line flags win over the configuration file
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(listen) = &cli.listen {
        config.server.listen = listen.clone();
    }
    if let Some(name) = &cli.server_name {
        config.server.name = name.clone();
    }
    if let Some(key) = &cli.api_key {
        config.workspace.api_key = Some(key.clone());
    }
    if let Some(pagination) = cli.pagination {
        config.workspace.pagination = pagination;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.workspace.chunk_size = chunk_size;
    }
    if let (Some(cert), Some(key)) = (&cli.tls_cert, &cli.tls_key) {
        config.tls.enabled = true;
        config.tls.cert_file = Some(cert.clone());
        config.tls.key_file = Some(key.clone());
    }
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();

    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &PathBuf) -> anyhow::Result<()> {
    let config = Config::default();
    config.to_file(output)?;
    println!("Generated default configuration file: {:?}", output);
    Ok(())
}

/// Show version information
fn show_version() {
    println!("slackircd {}", env!("CARGO_PKG_VERSION"));
}
