//! In-memory backend for unit tests
//!
//! Handles are counters. Signals are scripted per wait, by path or by raw
//! handle, so emitter logic can be driven deterministically against a real
//! temporary directory.

use crate::platform::{Backend, BackendKind, Signal, SignalFlags};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Scripted {
    Path(PathBuf, SignalFlags),
    Handle(u64, SignalFlags),
    Overflow,
    Fail(io::ErrorKind),
}

#[derive(Default)]
pub struct FakeBackend {
    pub opened: Mutex<AHashMap<u64, PathBuf>>,
    pub closed: Mutex<Vec<u64>>,
    pub aliases: Mutex<AHashMap<PathBuf, u64>>,
    pub fail_with: Mutex<Option<fn() -> io::Error>>,
    /// Paths whose open reports NotFound even though they exist
    pub vanishing: Mutex<Vec<PathBuf>>,
    pub script: Mutex<VecDeque<Vec<Scripted>>>,
    pub shut_down: Mutex<bool>,
    next: Mutex<u64>,
}

impl FakeBackend {
    /// Queue one batch for the next wait
    pub fn push(&self, batch: Vec<Scripted>) {
        self.script.lock().push_back(batch);
    }

    pub fn handle_for(&self, path: &Path) -> Option<u64> {
        self.opened
            .lock()
            .iter()
            .find(|(_, p)| p.as_path() == path)
            .map(|(handle, _)| *handle)
    }
}

impl Backend for FakeBackend {
    type Handle = u64;

    fn kind(&self) -> BackendKind {
        BackendKind::Portable
    }

    fn open(&self, path: &Path, _is_directory: bool) -> io::Result<u64> {
        if let Some(fail) = *self.fail_with.lock() {
            return Err(fail());
        }
        if self.vanishing.lock().iter().any(|p| p == path) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        path.symlink_metadata()?;
        if let Some(&handle) = self.aliases.lock().get(path) {
            return Ok(handle);
        }
        let mut next = self.next.lock();
        *next += 1;
        self.opened.lock().insert(*next, path.to_path_buf());
        Ok(*next)
    }

    fn close(&self, handle: u64) -> io::Result<()> {
        self.closed.lock().push(handle);
        match self.opened.lock().remove(&handle) {
            Some(_) => Ok(()),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn wait(&self, timeout: Duration, signals: &mut Vec<Signal<u64>>) -> io::Result<()> {
        if *self.shut_down.lock() {
            return Err(crate::platform::closed_error());
        }
        let batch = self.script.lock().pop_front();
        let Some(batch) = batch else {
            std::thread::sleep(timeout);
            return Ok(());
        };

        for scripted in batch {
            match scripted {
                Scripted::Path(path, flags) => {
                    if let Some(handle) = self.handle_for(&path) {
                        signals.push(Signal::Vnode { handle, flags });
                    }
                }
                Scripted::Handle(handle, flags) => signals.push(Signal::Vnode { handle, flags }),
                Scripted::Overflow => signals.push(Signal::Overflow),
                Scripted::Fail(kind) => return Err(io::Error::new(kind, "scripted failure")),
            }
        }
        crate::platform::coalesce(signals);
        Ok(())
    }

    fn shutdown(&self) {
        *self.shut_down.lock() = true;
    }
}
