//! Watcher configuration
//!
//! Loaded from TOML; every field has a default so an empty file (or no
//! file) is a valid configuration.

use crate::error::{Result, WatchError};
use crate::platform::BackendKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Which backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    /// The native backend for this platform
    #[default]
    Auto,
    Kqueue,
    Inotify,
    Portable,
}

impl BackendChoice {
    pub fn resolve(self) -> BackendKind {
        match self {
            BackendChoice::Auto => BackendKind::native(),
            BackendChoice::Kqueue => BackendKind::Kqueue,
            BackendChoice::Inotify => BackendKind::Inotify,
            BackendChoice::Portable => BackendKind::Portable,
        }
    }
}

impl FromStr for BackendChoice {
    type Err = WatchError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "kqueue" => Ok(BackendChoice::Kqueue),
            "inotify" => Ok(BackendChoice::Inotify),
            "portable" => Ok(BackendChoice::Portable),
            other => Err(WatchError::Config(format!("unknown backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub backend: BackendChoice,
    /// Upper bound on one native wait, which also bounds stop latency
    pub timeout_ms: u64,
    /// Most raw signals consumed per wait
    pub max_events: usize,
    /// Bound on the shared event queue; unbounded when absent
    pub queue_capacity: Option<usize>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            timeout_ms: 1000,
            max_events: 4096,
            queue_capacity: None,
        }
    }
}

impl WatcherConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|err| WatchError::Config(format!("{}: {}", path.display(), err)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|err| WatchError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(WatchError::Config("timeout_ms must be positive".into()));
        }
        if self.max_events == 0 {
            return Err(WatchError::Config("max_events must be positive".into()));
        }
        if self.queue_capacity == Some(0) {
            return Err(WatchError::Config("queue_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
