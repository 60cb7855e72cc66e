//! Portable backend on top of the `notify` crate
//!
//! Each path gets its own non-recursive notify watch and a synthetic
//! handle. Notify events are translated back into raw signals on the
//! affected handle and its parent directory's handle, so the emitter's
//! resolution logic runs unchanged.

use super::{
    closed_error, coalesce, Backend, BackendKind, HandleLimitReached, Signal, SignalFlags,
};
use ahash::AHashMap;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Default)]
struct PortableIndex {
    by_path: AHashMap<PathBuf, u64>,
    by_handle: AHashMap<u64, PathBuf>,
    next: u64,
}

impl PortableIndex {
    fn push(&self, signals: &mut Vec<Signal<u64>>, path: &Path, flags: SignalFlags) {
        if let Some(&handle) = self.by_path.get(path) {
            signals.push(Signal::Vnode { handle, flags });
        }
    }

    fn push_parent(&self, signals: &mut Vec<Signal<u64>>, path: &Path) {
        if let Some(parent) = path.parent() {
            self.push(signals, parent, SignalFlags::WRITE);
        }
    }
}

pub struct PortableBackend {
    watcher: Mutex<Option<RecommendedWatcher>>,
    rx: Receiver<notify::Result<Event>>,
    index: Mutex<PortableIndex>,
    max_events: usize,
}

impl PortableBackend {
    pub fn new(max_events: usize) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = recommended_watcher(move |result: notify::Result<Event>| {
            // The receiver only goes away with the backend itself
            let _ = tx.send(result);
        })
        .map_err(into_io)?;
        debug!("Created notify watcher");
        Ok(Self {
            watcher: Mutex::new(Some(watcher)),
            rx,
            index: Mutex::new(PortableIndex::default()),
            max_events: max_events.max(1),
        })
    }

    fn translate(&self, event: Event, signals: &mut Vec<Signal<u64>>) {
        if event.need_rescan() {
            signals.push(Signal::Overflow);
            return;
        }

        let index = self.index.lock();
        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    index.push_parent(signals, path);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    index.push(signals, path, SignalFlags::DELETE);
                    index.push_parent(signals, path);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::To => {
                    for path in &event.paths {
                        index.push_parent(signals, path);
                    }
                }
                RenameMode::From | RenameMode::Both => {
                    if let Some(src) = event.paths.first() {
                        index.push(signals, src, SignalFlags::RENAME);
                    }
                    for path in &event.paths {
                        index.push_parent(signals, path);
                    }
                }
                _ => {
                    // Direction unknown: whichever side no longer exists moved away
                    for path in &event.paths {
                        if path.symlink_metadata().is_err() {
                            index.push(signals, path, SignalFlags::RENAME);
                        }
                        index.push_parent(signals, path);
                    }
                }
            },
            EventKind::Modify(ModifyKind::Metadata(_)) => {
                for path in &event.paths {
                    index.push(signals, path, SignalFlags::ATTRIB);
                }
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    index.push(signals, path, SignalFlags::WRITE);
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
    }

    fn accept(&self, received: notify::Result<Event>, signals: &mut Vec<Signal<u64>>) {
        match received {
            Ok(event) => self.translate(event, signals),
            Err(err) => warn!("notify reported an error: {}", err),
        }
    }
}

fn into_io(err: notify::Error) -> io::Error {
    match err.kind {
        notify::ErrorKind::Io(err) => err,
        notify::ErrorKind::PathNotFound => io::Error::from(io::ErrorKind::NotFound),
        notify::ErrorKind::WatchNotFound => {
            io::Error::new(io::ErrorKind::NotFound, "watch not found")
        }
        notify::ErrorKind::MaxFilesWatch => {
            io::Error::new(io::ErrorKind::Other, HandleLimitReached)
        }
        notify::ErrorKind::InvalidConfig(config) => io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid notify configuration: {config:?}"),
        ),
        notify::ErrorKind::Generic(message) => io::Error::new(io::ErrorKind::Other, message),
    }
}

impl Backend for PortableBackend {
    type Handle = u64;

    fn kind(&self) -> BackendKind {
        BackendKind::Portable
    }

    fn open(&self, path: &Path, _is_directory: bool) -> io::Result<u64> {
        let mut watcher = self.watcher.lock();
        let watcher = watcher.as_mut().ok_or_else(closed_error)?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(into_io)?;

        let mut index = self.index.lock();
        index.next += 1;
        let handle = index.next;
        index.by_path.insert(path.to_path_buf(), handle);
        index.by_handle.insert(handle, path.to_path_buf());
        trace!(handle, "Watching {}", path.display());
        Ok(handle)
    }

    fn close(&self, handle: u64) -> io::Result<()> {
        let path = {
            let mut index = self.index.lock();
            let path = index
                .by_handle
                .remove(&handle)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown handle"))?;
            if index.by_path.get(&path) == Some(&handle) {
                index.by_path.remove(&path);
            }
            path
        };

        let mut watcher = self.watcher.lock();
        match watcher.as_mut() {
            Some(watcher) => watcher.unwatch(&path).map_err(into_io),
            None => Ok(()),
        }
    }

    fn wait(&self, timeout: Duration, signals: &mut Vec<Signal<u64>>) -> io::Result<()> {
        // The notify thread drops its sender asynchronously after shutdown
        if self.watcher.lock().is_none() {
            return Err(closed_error());
        }
        let first = match self.rx.recv_timeout(timeout) {
            Ok(received) => received,
            Err(RecvTimeoutError::Timeout) => return Ok(()),
            Err(RecvTimeoutError::Disconnected) => return Err(closed_error()),
        };
        self.accept(first, signals);

        let mut drained = 1;
        while drained < self.max_events {
            match self.rx.try_recv() {
                Ok(received) => {
                    self.accept(received, signals);
                    drained += 1;
                }
                Err(_) => break,
            }
        }

        coalesce(signals);
        Ok(())
    }

    fn shutdown(&self) {
        if self.watcher.lock().take().is_some() {
            debug!("Dropped notify watcher");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use tempfile::TempDir;

    fn backend_with(paths: &[&Path]) -> (PortableBackend, Vec<u64>) {
        let backend = PortableBackend::new(64).unwrap();
        let handles = paths
            .iter()
            .map(|path| backend.open(path, true).unwrap())
            .collect();
        (backend, handles)
    }

    #[test]
    fn test_create_signals_parent_write() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (backend, handles) = backend_with(&[root]);

        let mut signals = Vec::new();
        let event = Event::new(EventKind::Create(CreateKind::File)).add_path(root.join("a.txt"));
        backend.translate(event, &mut signals);

        assert_eq!(
            signals,
            vec![Signal::Vnode { handle: handles[0], flags: SignalFlags::WRITE }]
        );
    }

    #[test]
    fn test_remove_signals_self_and_parent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let file = root.join("a.txt");
        std::fs::write(&file, b"x").unwrap();
        let (backend, handles) = backend_with(&[root, &file]);

        let mut signals = Vec::new();
        let event = Event::new(EventKind::Remove(RemoveKind::File)).add_path(file.clone());
        backend.translate(event, &mut signals);

        assert!(signals.contains(&Signal::Vnode {
            handle: handles[1],
            flags: SignalFlags::DELETE
        }));
        assert!(signals.contains(&Signal::Vnode {
            handle: handles[0],
            flags: SignalFlags::WRITE
        }));
    }

    #[test]
    fn test_modify_kinds() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();
        let (backend, handles) = backend_with(&[&file]);

        let mut signals = Vec::new();
        let data = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(file.clone());
        let meta = Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)))
            .add_path(file.clone());
        backend.translate(data, &mut signals);
        backend.translate(meta, &mut signals);
        coalesce(&mut signals);

        assert_eq!(
            signals,
            vec![Signal::Vnode {
                handle: handles[0],
                flags: SignalFlags::WRITE | SignalFlags::ATTRIB
            }]
        );
    }

    #[test]
    fn test_rescan_becomes_overflow() {
        let backend = PortableBackend::new(8).unwrap();
        let mut signals = Vec::new();
        let event = Event::new(EventKind::Other).set_flag(notify::event::Flag::Rescan);
        backend.translate(event, &mut signals);
        assert_eq!(signals, vec![Signal::Overflow]);
    }

    #[test]
    fn test_close_forgets_handle() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let (backend, handles) = backend_with(&[root]);

        backend.close(handles[0]).unwrap();
        assert!(backend.close(handles[0]).is_err());

        let mut signals = Vec::new();
        let event = Event::new(EventKind::Create(CreateKind::File)).add_path(root.join("a.txt"));
        backend.translate(event, &mut signals);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_wait_receives_from_notify_thread() {
        let temp_dir = TempDir::new().unwrap();
        let root = std::fs::canonicalize(temp_dir.path()).unwrap();
        let (backend, handles) = backend_with(&[&root]);

        std::fs::write(root.join("a.txt"), b"x").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut signals = Vec::new();
        while std::time::Instant::now() < deadline {
            backend.wait(Duration::from_millis(100), &mut signals).unwrap();
            if signals.iter().any(|s| {
                matches!(s, Signal::Vnode { handle, flags }
                    if *handle == handles[0] && flags.contains(SignalFlags::WRITE))
            }) {
                return;
            }
        }
        panic!("no signal for the watched directory: {:?}", signals);
    }

    #[test]
    fn test_wait_after_shutdown_is_closed() {
        let backend = PortableBackend::new(8).unwrap();
        backend.shutdown();
        let err = backend
            .wait(Duration::from_millis(10), &mut Vec::new())
            .unwrap_err();
        assert_eq!(
            super::super::classify_wait_error(&err),
            super::super::WaitFailure::Closed
        );
    }
}
