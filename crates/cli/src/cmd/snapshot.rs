//! Print a directory snapshot

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tidewatch_core::{paths, DirectoryEntry, Snapshot};

#[derive(Serialize)]
struct EntryRecord {
    path: PathBuf,
    is_directory: bool,
    inode: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<u64>,
}

impl From<&DirectoryEntry> for EntryRecord {
    fn from(entry: &DirectoryEntry) -> Self {
        Self {
            path: entry.path.clone(),
            is_directory: entry.is_directory,
            inode: entry.inode.to_string(),
            size: entry.size,
            modified: util::unix_seconds(entry.modified),
        }
    }
}

pub fn run(path: &Path, recursive: bool, json: bool) -> Result<()> {
    let root = paths::canonical(path)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    let snapshot = Snapshot::capture(&root, recursive)
        .with_context(|| format!("Failed to capture {}", root.display()))?;

    if json {
        let records: Vec<EntryRecord> = snapshot.entries().map(EntryRecord::from).collect();
        let out = serde_json::to_string_pretty(&records).context("Failed to serialize snapshot")?;
        println!("{}", out);
        return Ok(());
    }

    println!("{}", format!("Snapshot of {}", root.display()).bold());
    for entry in snapshot.entries() {
        let name = util::display_relative(&entry.path, &root);
        if entry.is_directory {
            println!("  {:>21}  {:>10}  {}/", entry.inode.to_string().dimmed(), "-", name.blue());
        } else {
            println!("  {:>21}  {:>10}  {}", entry.inode.to_string().dimmed(), entry.size, name);
        }
    }
    println!();
    println!("{} entries", snapshot.len());
    Ok(())
}
