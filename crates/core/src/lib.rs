//! Snapshot, diff and event primitives for Tidewatch
//!
//! This crate provides:
//! - Point-in-time directory snapshots with an inode index
//! - Suspect-restricted snapshot diffing with rename correlation
//! - The canonical event taxonomy shared by every watcher backend
//! - Path canonicalization applied before any map lookup

pub mod diff;
pub mod error;
pub mod event;
pub mod paths;
pub mod snapshot;

// Re-exports
pub use diff::{resolve, resolve_all, Move, Resolution};
pub use error::{Result, SnapshotError};
pub use event::{CanonicalEvent, Change, EventRecord, EventType};
pub use snapshot::{DirectoryEntry, InodeKey, Snapshot};
