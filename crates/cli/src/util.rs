//! Shared output helpers for CLI commands

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tidewatch_core::{CanonicalEvent, Change, EventRecord};

/// One event as a human-readable, colored line
pub fn format_event(event: &CanonicalEvent) -> String {
    let kind = if event.is_directory { "dir " } else { "file" };
    match &event.change {
        Change::Created(path) => format!("{} {} {}", "created ".green(), kind, path.display()),
        Change::Deleted(path) => format!("{} {} {}", "deleted ".red(), kind, path.display()),
        Change::Modified(path) => format!("{} {} {}", "modified".yellow(), kind, path.display()),
        Change::AttributeModified(path) => {
            format!("{} {} {}", "attrib  ".dimmed(), kind, path.display())
        }
        Change::Moved { src, dest } => format!(
            "{} {} {} -> {}",
            "moved   ".cyan(),
            kind,
            src.display(),
            dest.display()
        ),
    }
}

/// One event as a single-line JSON record
pub fn format_event_json(event: &CanonicalEvent) -> Result<String> {
    serde_json::to_string(&EventRecord::from(event)).context("Failed to serialize event")
}

/// Seconds since the epoch, `None` for times before it
pub fn unix_seconds(time: Option<SystemTime>) -> Option<u64> {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}

/// `path` relative to `root` for display, `.` for the root itself
pub fn display_relative(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
        Ok(relative) => relative.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = CanonicalEvent::moved("/w/a".into(), "/w/b".into(), false);
        let json = format_event_json(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"moved","is_directory":false,"src_path":"/w/a","dest_path":"/w/b"}"#
        );

        let event = CanonicalEvent::created("/w/d".into(), true);
        let json = format_event_json(&event).unwrap();
        assert_eq!(json, r#"{"type":"created","is_directory":true,"src_path":"/w/d"}"#);
    }

    #[test]
    fn test_display_relative() {
        let root = Path::new("/w");
        assert_eq!(display_relative(Path::new("/w"), root), ".");
        assert_eq!(display_relative(Path::new("/w/a/b"), root), "a/b");
        assert_eq!(display_relative(Path::new("/x"), root), "/x");
    }

    #[test]
    fn test_format_event_mentions_paths() {
        let line = format_event(&CanonicalEvent::moved("/w/a".into(), "/w/b".into(), true));
        assert!(line.contains("/w/a -> /w/b"));
        assert!(line.contains("dir"));
    }
}
