//! Tidewatch CLI - tw command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use watcher::BackendChoice;

mod cmd;
mod util;

/// Tidewatch - per-path native file watching
#[derive(Parser)]
#[command(name = "tw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and print events until Ctrl-C
    Watch {
        /// Directory to watch
        path: PathBuf,
        /// Watch the whole tree, not just direct children
        #[arg(short, long)]
        recursive: bool,
        /// Upper bound on one native wait, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Backend: auto, kqueue, inotify or portable
        #[arg(long)]
        backend: Option<BackendChoice>,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print one JSON record per event
        #[arg(long)]
        json: bool,
    },
    /// Print a snapshot of a directory
    Snapshot {
        /// Directory to capture
        path: PathBuf,
        /// Include the whole tree, not just direct children
        #[arg(short, long)]
        recursive: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so event output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            path,
            recursive,
            timeout_ms,
            backend,
            config,
            json,
        } => {
            let options = cmd::watch::WatchOptions {
                recursive,
                timeout_ms,
                backend,
                config,
                json,
            };
            cmd::watch::run(&path, options).await
        }
        Commands::Snapshot {
            path,
            recursive,
            json,
        } => cmd::snapshot::run(&path, recursive, json),
    }
}
