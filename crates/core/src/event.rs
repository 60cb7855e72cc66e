//! Canonical filesystem events
//!
//! Every backend, whatever its native primitive, reports changes in this
//! one taxonomy: five kinds of change, each tagged file or directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of change, without its paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Deleted,
    Modified,
    AttributeModified,
    Moved,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Created => "created",
            EventType::Deleted => "deleted",
            EventType::Modified => "modified",
            EventType::AttributeModified => "attribute_modified",
            EventType::Moved => "moved",
        };
        f.write_str(name)
    }
}

/// What happened, with the absolute path(s) involved
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Change {
    Created(PathBuf),
    Deleted(PathBuf),
    Modified(PathBuf),
    AttributeModified(PathBuf),
    Moved { src: PathBuf, dest: PathBuf },
}

/// A platform-independent change notification
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalEvent {
    pub change: Change,
    pub is_directory: bool,
}

impl CanonicalEvent {
    pub fn created(path: PathBuf, is_directory: bool) -> Self {
        Self {
            change: Change::Created(path),
            is_directory,
        }
    }

    pub fn deleted(path: PathBuf, is_directory: bool) -> Self {
        Self {
            change: Change::Deleted(path),
            is_directory,
        }
    }

    pub fn modified(path: PathBuf, is_directory: bool) -> Self {
        Self {
            change: Change::Modified(path),
            is_directory,
        }
    }

    pub fn attribute_modified(path: PathBuf, is_directory: bool) -> Self {
        Self {
            change: Change::AttributeModified(path),
            is_directory,
        }
    }

    pub fn moved(src: PathBuf, dest: PathBuf, is_directory: bool) -> Self {
        Self {
            change: Change::Moved { src, dest },
            is_directory,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self.change {
            Change::Created(_) => EventType::Created,
            Change::Deleted(_) => EventType::Deleted,
            Change::Modified(_) => EventType::Modified,
            Change::AttributeModified(_) => EventType::AttributeModified,
            Change::Moved { .. } => EventType::Moved,
        }
    }

    /// The path the event is about (the source, for moves)
    pub fn src_path(&self) -> &Path {
        match &self.change {
            Change::Created(path)
            | Change::Deleted(path)
            | Change::Modified(path)
            | Change::AttributeModified(path) => path,
            Change::Moved { src, .. } => src,
        }
    }

    /// Destination of a move, `None` for every other kind
    pub fn dest_path(&self) -> Option<&Path> {
        match &self.change {
            Change::Moved { dest, .. } => Some(dest),
            _ => None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }
}

impl fmt::Display for CanonicalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = if self.is_directory { "directory" } else { "file" };
        match &self.change {
            Change::Moved { src, dest } => write!(
                f,
                "moved {} {} -> {}",
                target,
                src.display(),
                dest.display()
            ),
            _ => write!(
                f,
                "{} {} {}",
                self.event_type(),
                target,
                self.src_path().display()
            ),
        }
    }
}

/// Flat wire shape for downstream consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub is_directory: bool,
    pub src_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dest_path: Option<PathBuf>,
}

impl From<&CanonicalEvent> for EventRecord {
    fn from(event: &CanonicalEvent) -> Self {
        Self {
            event_type: event.event_type(),
            is_directory: event.is_directory,
            src_path: event.src_path().to_path_buf(),
            dest_path: event.dest_path().map(Path::to_path_buf),
        }
    }
}
