use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use github_backup::daemon::spawn_signal_bridge;
use github_backup::{Config, Daemon, SyncEngine};

#[derive(Parser)]
#[command(name = "github-backup")]
#[command(about = "Keep bare mirrors of GitHub repositories up to date")]
#[command(version)]
struct Cli {
    /// YAML configuration file (defaults to GITHUB_BACKUP_* environment variables)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run a single backup pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    info!("Starting github-backup v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Backing up {} owner(s) into {}",
        config.owners.len(),
        config.directory.display()
    );

    let engine = SyncEngine::from_config(&config)?;

    if cli.once {
        let cancel = CancellationToken::new();
        let bridge = spawn_signal_bridge(cancel.clone())?;
        let result = engine.perform(&cancel).await;
        bridge.abort();
        result?;
        return Ok(());
    }

    Daemon::new(engine, config.period()).run().await?;
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Load configuration from the given file or from the environment
fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
}
