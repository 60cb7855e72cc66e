//! Multi-root observer
//!
//! Schedules any number of watches onto one shared event queue. Each
//! scheduled root gets its own emitter thread and backend instance.

use crate::config::WatcherConfig;
use crate::emitter::EmitterState;
use crate::error::{Result, WatchError};
use crate::queue::{EventQueue, ObservedEvent, WatchId};
use crate::watch::{self, WatchHandle};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

pub struct Observer {
    config: WatcherConfig,
    queue: EventQueue,
    watches: DashMap<WatchId, WatchHandle>,
    next_id: AtomicU64,
}

impl Observer {
    pub fn new(config: WatcherConfig) -> Self {
        let queue = EventQueue::with_capacity(config.queue_capacity);
        Self {
            config,
            queue,
            watches: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Watch `path` with the configured wait timeout
    pub fn schedule(&self, path: &Path, recursive: bool) -> Result<WatchId> {
        self.schedule_with_timeout(path, recursive, self.config.timeout())
    }

    pub fn schedule_with_timeout(
        &self,
        path: &Path,
        recursive: bool,
        timeout: Duration,
    ) -> Result<WatchId> {
        let id = WatchId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = watch::start(path, recursive, timeout, &self.config, self.queue.sink(id))?;
        info!(watch = %id, recursive, "Scheduled {}", handle.root().display());
        self.watches.insert(id, handle);
        Ok(id)
    }

    /// Stop one watch and forget it
    pub fn unschedule(&self, id: WatchId) -> Result<()> {
        let (_, handle) = self
            .watches
            .remove(&id)
            .ok_or_else(|| WatchError::NotFound(id.to_string()))?;
        handle.stop()
    }

    /// Stop every watch; reports the first failure after stopping all of them
    pub fn stop(&self) -> Result<()> {
        let ids: Vec<WatchId> = self.watches.iter().map(|entry| *entry.key()).collect();
        let mut first_error = None;
        for id in ids {
            if let Some((_, handle)) = self.watches.remove(&id) {
                if let Err(err) = handle.stop() {
                    warn!(watch = %id, "Watch ended with error: {}", err);
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn events(&self) -> &EventQueue {
        &self.queue
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ObservedEvent> {
        self.queue.recv_timeout(timeout)
    }

    pub fn watch_ids(&self) -> Vec<WatchId> {
        let mut ids: Vec<WatchId> = self.watches.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn state(&self, id: WatchId) -> Option<EmitterState> {
        self.watches.get(&id).map(|handle| handle.state())
    }

    pub fn root(&self, id: WatchId) -> Option<PathBuf> {
        self.watches.get(&id).map(|handle| handle.root().to_path_buf())
    }

    pub fn watched_paths(&self, id: WatchId) -> Option<Vec<PathBuf>> {
        self.watches.get(&id).map(|handle| handle.watched_paths())
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
