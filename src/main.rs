//! Marketplace server binary.

use bazaar::{MarketServer, Result, ServerConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

/// Line-protocol marketplace server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on.
    #[arg(long)]
    listen: Option<String>,

    /// Directory holding the user/item tables and conversation files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Stop-word list used by the tag extractor.
    #[arg(long)]
    stopwords: Option<PathBuf>,

    /// Special-character list used by the tag extractor.
    #[arg(long)]
    special_chars: Option<PathBuf>,

    /// JSON config file; explicit flags override its fields.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn resolve_config(cli: Cli) -> Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.bind_addr = listen;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(stopwords) = cli.stopwords {
        config.stopwords_path = stopwords;
    }
    if let Some(special_chars) = cli.special_chars {
        config.special_chars_path = special_chars;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = resolve_config(Cli::parse())?;
    let server = Arc::new(MarketServer::new(config)?);

    // Graceful shutdown on ctrl-c.
    let server_clone = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        if let Err(err) = server_clone.shutdown() {
            warn!(error = %err, "failed to initiate shutdown");
        }
    });

    server.run().await
}
