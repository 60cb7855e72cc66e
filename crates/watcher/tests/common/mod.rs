//! Shared helpers for watcher integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use watcher::{CanonicalEvent, EventType, Observer, WatchId, WatcherConfig};

/// How long to wait for an expected event before failing
pub const EVENT_DEADLINE: Duration = Duration::from_secs(5);

/// How long a quiet queue must stay quiet to count as settled
pub const SETTLE: Duration = Duration::from_millis(300);

/// A watched temporary directory
pub struct Watched {
    _temp_dir: TempDir,
    pub root: PathBuf,
    pub observer: Observer,
    pub id: WatchId,
}

impl Watched {
    pub fn new(recursive: bool) -> Self {
        Self::with_config(recursive, test_config())
    }

    pub fn with_config(recursive: bool, config: WatcherConfig) -> Self {
        Self::prepared(recursive, config, |_| {})
    }

    /// Populate the directory before the watch starts
    pub fn prepared(recursive: bool, config: WatcherConfig, setup: impl FnOnce(&Path)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        setup(&root);

        let observer = Observer::new(config);
        let id = observer.schedule(&root, recursive).unwrap();
        Self {
            _temp_dir: temp_dir,
            root,
            observer,
            id,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Collect events until one matches `wanted`, failing after the deadline
    pub fn wait_for(&self, wanted: impl Fn(&CanonicalEvent) -> bool) -> Vec<CanonicalEvent> {
        let deadline = Instant::now() + EVENT_DEADLINE;
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            if let Some(observed) = self.observer.recv_timeout(Duration::from_millis(50)) {
                assert_eq!(observed.watch, self.id);
                let matched = wanted(&observed.event);
                seen.push(observed.event);
                if matched {
                    return seen;
                }
            }
        }
        panic!("expected event never arrived; saw {:?}", seen);
    }

    /// Everything that arrives until the queue stays quiet for `SETTLE`
    pub fn settle(&self) -> Vec<CanonicalEvent> {
        let mut seen = Vec::new();
        while let Some(observed) = self.observer.recv_timeout(SETTLE) {
            seen.push(observed.event);
        }
        seen
    }

    /// Poll `condition` until it holds or the deadline passes
    pub fn eventually(&self, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + EVENT_DEADLINE;
        while Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.observer.watched_paths(self.id).unwrap_or_default()
    }
}

pub fn test_config() -> WatcherConfig {
    WatcherConfig {
        timeout_ms: 100,
        ..WatcherConfig::default()
    }
}

pub fn is(kind: EventType, path: &Path) -> impl Fn(&CanonicalEvent) -> bool + '_ {
    move |event| event.event_type() == kind && event.src_path() == path
}

pub fn kinds(events: &[CanonicalEvent]) -> Vec<EventType> {
    events.iter().map(CanonicalEvent::event_type).collect()
}
