//! pivaultd: PII tokenisation vault daemon
//!
//! Usage:
//!   pivaultd [--config /etc/pivault/pivault.toml] [--mode engine|worker|migrate]
//!
//! Modes:
//!   engine   - Full engine process: workers, purge loop, health + metrics [default]
//!   worker   - Queue drainers only (horizontally scaled persistence pods)
//!   migrate  - Apply store migrations and exit

mod daemon;
mod metrics;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pivaultd", version, about = "PII tokenisation vault daemon")]
struct Cli {
    /// Path to pivault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PIVAULT_CONFIG",
        default_value = "/etc/pivault/pivault.toml"
    )]
    config: PathBuf,

    /// Process mode
    #[arg(long, default_value = "engine")]
    mode: Mode,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PIVAULT_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "PIVAULT_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum Mode {
    /// Full engine process (default)
    Engine,
    /// Queue drainers only
    Worker,
    /// Run migrations and exit
    Migrate,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?cli.mode,
        config = %cli.config.display(),
        "pivaultd starting"
    );

    let config = load_config(&cli.config).await?;

    match cli.mode {
        Mode::Engine => daemon::run(config, daemon::RunMode::Engine).await,
        Mode::Worker => daemon::run(config, daemon::RunMode::Worker).await,
        Mode::Migrate => daemon::migrate(config).await,
    }
}

async fn load_config(path: &PathBuf) -> Result<pivault_core::config::VaultConfig> {
    let mut config: pivault_core::config::VaultConfig = if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?
    } else {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            path.display()
        );
        pivault_core::config::VaultConfig::default()
    };

    config.apply_env_overrides();
    Ok(config)
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
