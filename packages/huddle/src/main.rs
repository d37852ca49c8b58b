use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

use crate::config::{FileConfig, HuddleConfig, load_config};

#[derive(Parser)]
#[command(name = "huddle")]
#[command(about = "Terminal client for the suite's team chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.huddle)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List rooms visible to the current user
    Rooms,

    /// Open a room and stream its conversation
    Open {
        /// Room id, as shown by `huddle rooms`
        room_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let dirs = HuddleConfig::new(cli.data_dir)?;
    let config: FileConfig = load_config(&dirs.data_dir).extract()?;

    match cli.command {
        Commands::Rooms => cli::rooms::rooms(&config).await,
        Commands::Open { room_id } => cli::open::open(&config, &room_id).await,
    }
}
