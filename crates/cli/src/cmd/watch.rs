//! Watch a directory until Ctrl-C

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use watcher::{BackendChoice, Observer, WatcherConfig};

pub struct WatchOptions {
    pub recursive: bool,
    pub timeout_ms: Option<u64>,
    pub backend: Option<BackendChoice>,
    pub config: Option<PathBuf>,
    pub json: bool,
}

/// Config file values, overridden by command-line flags
fn resolve_config(options: &WatchOptions) -> Result<WatcherConfig> {
    let mut config = match &options.config {
        Some(path) => WatcherConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => WatcherConfig::default(),
    };
    if let Some(timeout_ms) = options.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(backend) = options.backend {
        config.backend = backend;
    }
    config.validate().context("Invalid watcher configuration")?;
    Ok(config)
}

pub async fn run(path: &Path, options: WatchOptions) -> Result<()> {
    let config = resolve_config(&options)?;
    let observer = Arc::new(Observer::new(config));

    let id = observer
        .schedule(path, options.recursive)
        .with_context(|| format!("Failed to watch {}", path.display()))?;

    let root = observer.root(id).unwrap_or_else(|| path.to_path_buf());
    let watched = observer.watched_paths(id).map_or(0, |paths| paths.len());
    if !options.json {
        println!(
            "{} {} ({} paths, {} backend)",
            "Watching".green().bold(),
            root.display(),
            watched,
            observer.config().backend.resolve()
        );
        println!("{}", "Press Ctrl-C to stop".dimmed());
    }

    let done = Arc::new(AtomicBool::new(false));
    let printer = {
        let observer = Arc::clone(&observer);
        let done = Arc::clone(&done);
        let json = options.json;
        tokio::task::spawn_blocking(move || -> Result<()> {
            while !done.load(Ordering::Acquire) {
                let Some(observed) = observer.recv_timeout(Duration::from_millis(200)) else {
                    continue;
                };
                let line = if json {
                    util::format_event_json(&observed.event)?
                } else {
                    util::format_event(&observed.event)
                };
                println!("{}", line);
            }
            Ok(())
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Stopping");

    done.store(true, Ordering::Release);
    observer.stop().context("Watcher stopped with an error")?;
    printer.await.context("Event printer panicked")??;
    Ok(())
}
