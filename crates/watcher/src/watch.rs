//! Starting and stopping a single watch

use crate::config::WatcherConfig;
use crate::descriptor::WatchedPaths;
use crate::emitter::{Emitter, EmitterState, StateCell, StopToken, WatchRoot};
use crate::error::{Result, WatchError};
use crate::platform::{portable::PortableBackend, Backend, BackendKind};
use crate::queue::{EventSink, WatchId};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tidewatch_core::paths;
use tracing::{debug, warn};

/// A running watch
///
/// Dropping the handle stops the watch.
pub struct WatchHandle {
    id: WatchId,
    root: WatchRoot,
    backend: BackendKind,
    stop: StopToken,
    state: Arc<StateCell>,
    watched: Arc<dyn WatchedPaths>,
    thread: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl WatchHandle {
    pub fn id(&self) -> WatchId {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root.path
    }

    pub fn is_recursive(&self) -> bool {
        self.root.recursive
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn state(&self) -> EmitterState {
        self.state.get()
    }

    /// Paths that currently hold a native handle
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched.watched_paths()
    }

    pub fn descriptor_count(&self) -> usize {
        self.watched.watched_count()
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched.is_watching(path)
    }

    /// Stop the emitter and wait for it to tear down
    ///
    /// Returns within roughly one wait timeout. Calling it again is a no-op.
    /// Reports the error that ended the emitter, if any.
    pub fn stop(&self) -> Result<()> {
        self.stop.stop();
        let Some(thread) = self.thread.lock().take() else {
            return Ok(());
        };
        match thread.join() {
            Ok(result) => result,
            Err(_) => Err(WatchError::EmitterPanicked),
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(watch = %self.id, "Watch ended with error: {}", err);
        }
    }
}

/// Start watching `path`
///
/// INIT runs on the calling thread, so every entry present now is watched
/// by the time this returns. A missing root fails with a not-found error.
pub fn start(
    path: &Path,
    recursive: bool,
    timeout: Duration,
    config: &WatcherConfig,
    sink: EventSink,
) -> Result<WatchHandle> {
    let canonical = paths::canonical(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            WatchError::NotFound(path.display().to_string())
        } else {
            WatchError::Io(err)
        }
    })?;
    let root = WatchRoot {
        path: canonical,
        recursive,
        timeout,
    };

    let kind = config.backend.resolve();
    match kind {
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        ))]
        BackendKind::Kqueue => {
            use crate::platform::kqueue::{KqueueBackend, KQUEUE_TABLE};
            let backend = KqueueBackend::new(&KQUEUE_TABLE, config.max_events)
                .map_err(|source| WatchError::BackendInit { kind, source })?;
            spawn(backend, root, sink)
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        BackendKind::Inotify => {
            use crate::platform::inotify::{InotifyBackend, INOTIFY_TABLE};
            let backend = InotifyBackend::new(&INOTIFY_TABLE, config.max_events)
                .map_err(|source| WatchError::BackendInit { kind, source })?;
            spawn(backend, root, sink)
        }
        BackendKind::Portable => {
            let backend = PortableBackend::new(config.max_events)
                .map_err(|source| WatchError::BackendInit { kind, source })?;
            spawn(backend, root, sink)
        }
        #[allow(unreachable_patterns)]
        other => Err(WatchError::UnsupportedBackend(other)),
    }
}

fn spawn<B: Backend>(backend: B, root: WatchRoot, sink: EventSink) -> Result<WatchHandle> {
    let id = sink.watch();
    let kind = backend.kind();
    let state = Arc::new(StateCell::new());
    let emitter = Emitter::init(root.clone(), Arc::new(backend), sink, Arc::clone(&state))?;
    let watched = emitter.watched();

    let stop = StopToken::new();
    let token = stop.clone();
    let thread = thread::Builder::new()
        .name(format!("tidewatch-{}", id))
        .spawn(move || emitter.run(token))
        .map_err(WatchError::Spawn)?;

    debug!(watch = %id, backend = %kind, "Started emitter for {}", root.path.display());
    Ok(WatchHandle {
        id,
        root,
        backend: kind,
        stop,
        state,
        watched,
        thread: Mutex::new(Some(thread)),
    })
}
