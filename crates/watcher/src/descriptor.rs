//! Registry of native handles, indexed by path and by handle
//!
//! Both indices live behind one lock so that lookups never observe a path
//! without its handle or the reverse. The lock is held across the backend's
//! open and close calls but never across a wait.

use crate::error::{Result, WatchError};
use crate::platform::{is_exhaustion, is_vanished, Backend};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// One registered path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchDescriptor<H> {
    pub path: PathBuf,
    pub is_directory: bool,
    pub handle: H,
}

/// Outcome of [`DescriptorSet::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    /// The path already had a descriptor; nothing changed
    AlreadyWatched,
    /// The path disappeared before a handle could be opened
    Vanished,
    /// The native handle already belongs to another path (a hard link)
    Shared,
    /// The path exists but cannot carry a handle (a dangling symlink)
    Unwatchable,
}

struct Index<H> {
    by_path: AHashMap<PathBuf, WatchDescriptor<H>>,
    by_handle: AHashMap<H, PathBuf>,
}

pub struct DescriptorSet<B: Backend> {
    backend: Arc<B>,
    index: Mutex<Index<B::Handle>>,
}

impl<B: Backend> DescriptorSet<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            index: Mutex::new(Index {
                by_path: AHashMap::new(),
                by_handle: AHashMap::new(),
            }),
        }
    }

    /// Open a handle for `path` and index it
    pub fn add(&self, path: &Path, is_directory: bool) -> Result<Registration> {
        let mut index = self.index.lock();
        if index.by_path.contains_key(path) {
            return Ok(Registration::AlreadyWatched);
        }

        let handle = match self.backend.open(path, is_directory) {
            Ok(handle) => handle,
            Err(err) if is_exhaustion(&err) => {
                return Err(WatchError::ResourceExhaustion {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
            Err(err) => {
                return match path.symlink_metadata() {
                    Err(_) => {
                        trace!("{} vanished before registration", path.display());
                        Ok(Registration::Vanished)
                    }
                    Ok(meta) if meta.file_type().is_symlink() => {
                        debug!("Not watching symlink {}: {}", path.display(), err);
                        Ok(Registration::Unwatchable)
                    }
                    Ok(_) if is_vanished(&err) => Ok(Registration::Vanished),
                    Ok(_) => Err(WatchError::Register {
                        path: path.to_path_buf(),
                        source: err,
                    }),
                };
            }
        };

        if let Some(owner) = index.by_handle.get(&handle) {
            debug!(
                ?handle,
                "{} shares a native handle with {}",
                path.display(),
                owner.display()
            );
            return Ok(Registration::Shared);
        }

        index.by_handle.insert(handle, path.to_path_buf());
        index.by_path.insert(
            path.to_path_buf(),
            WatchDescriptor {
                path: path.to_path_buf(),
                is_directory,
                handle,
            },
        );
        trace!(?handle, "Registered {}", path.display());
        Ok(Registration::Added)
    }

    /// Close and forget the descriptor for `path`; absent paths are a no-op
    pub fn remove(&self, path: &Path) -> bool {
        let mut index = self.index.lock();
        let Some(descriptor) = index.by_path.remove(path) else {
            return false;
        };
        index.by_handle.remove(&descriptor.handle);
        if let Err(err) = self.backend.close(descriptor.handle) {
            // The node is usually already gone and took its handle with it
            trace!("Ignoring close failure for {}: {}", path.display(), err);
        }
        trace!("Unregistered {}", path.display());
        true
    }

    pub fn get(&self, path: &Path) -> Result<WatchDescriptor<B::Handle>> {
        self.index
            .lock()
            .by_path
            .get(path)
            .cloned()
            .ok_or_else(|| WatchError::NotFound(path.display().to_string()))
    }

    pub fn get_by_handle(&self, handle: B::Handle) -> Result<WatchDescriptor<B::Handle>> {
        let index = self.index.lock();
        index
            .by_handle
            .get(&handle)
            .and_then(|path| index.by_path.get(path))
            .cloned()
            .ok_or_else(|| WatchError::NotFound(format!("handle {handle:?}")))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.lock().by_path.contains_key(path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.index.lock().by_path.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.index.lock().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every handle
    pub fn clear(&self) {
        let mut index = self.index.lock();
        let count = index.by_path.len();
        for (_, descriptor) in index.by_path.drain() {
            if let Err(err) = self.backend.close(descriptor.handle) {
                trace!("Ignoring close failure for {}: {}", descriptor.path.display(), err);
            }
        }
        index.by_handle.clear();
        if count > 0 {
            debug!(count, "Closed all descriptors");
        }
    }
}

/// Read-only view of a descriptor set, independent of the backend type
pub trait WatchedPaths: Send + Sync {
    fn watched_paths(&self) -> Vec<PathBuf>;
    fn watched_count(&self) -> usize;
    fn is_watching(&self, path: &Path) -> bool;
}

impl<B: Backend> WatchedPaths for DescriptorSet<B> {
    fn watched_paths(&self) -> Vec<PathBuf> {
        self.paths()
    }

    fn watched_count(&self) -> usize {
        self.len()
    }

    fn is_watching(&self, path: &Path) -> bool {
        self.contains(path)
    }
}
