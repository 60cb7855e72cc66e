//! Per-root emitter
//!
//! Owns one backend, one descriptor set and the working snapshot for a
//! watched root. Runs `INIT -> RUNNING -> STOPPING -> STOPPED` on its own
//! thread: each iteration waits for one batch of raw signals, classifies
//! them, emits what can be resolved on the spot, and resyncs against a
//! fresh capture for everything else.

use crate::descriptor::{DescriptorSet, Registration, WatchDescriptor, WatchedPaths};
use crate::error::{Result, WatchError};
use crate::platform::{classify_wait_error, Backend, Signal, SignalFlags, WaitFailure};
use crate::queue::EventSink;
use crate::reconcile::{self, Deferred, ResyncPlan};
use smallvec::SmallVec;
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidewatch_core::{CanonicalEvent, Change, Snapshot};
use tracing::{debug, error, info, trace, warn};

/// Cooperative stop flag shared between a handle and its emitter
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EmitterState {
    Init = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl fmt::Display for EmitterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmitterState::Init => "init",
            EmitterState::Running => "running",
            EmitterState::Stopping => "stopping",
            EmitterState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(EmitterState::Init as u8))
    }

    pub fn get(&self) -> EmitterState {
        match self.0.load(Ordering::Acquire) {
            0 => EmitterState::Init,
            1 => EmitterState::Running,
            2 => EmitterState::Stopping,
            _ => EmitterState::Stopped,
        }
    }

    fn set(&self, state: EmitterState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// What one watch covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot {
    /// Canonical absolute path
    pub path: PathBuf,
    pub recursive: bool,
    /// Upper bound on one native wait
    pub timeout: Duration,
}

/// How the emitter treats one raw flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    Deleted,
    AttributeModified,
    Modified,
    RenameCandidate,
}

/// Classify raw flags; `Deleted` is terminal and suppresses the rest
pub fn classify(flags: SignalFlags, is_directory: bool) -> SmallVec<[SignalClass; 3]> {
    let mut classes = SmallVec::new();
    if flags.intersects(SignalFlags::DELETE | SignalFlags::REVOKE) {
        classes.push(SignalClass::Deleted);
        return classes;
    }
    if flags.contains(SignalFlags::ATTRIB) || (!is_directory && flags.contains(SignalFlags::LINK)) {
        classes.push(SignalClass::AttributeModified);
    }
    if flags.intersects(SignalFlags::WRITE | SignalFlags::EXTEND) {
        classes.push(SignalClass::Modified);
    }
    if flags.contains(SignalFlags::RENAME) {
        classes.push(SignalClass::RenameCandidate);
    }
    classes
}

enum Flow {
    Continue,
    Exit,
}

pub struct Emitter<B: Backend> {
    root: WatchRoot,
    backend: Arc<B>,
    descriptors: Arc<DescriptorSet<B>>,
    snapshot: Snapshot,
    sink: EventSink,
    state: Arc<StateCell>,
    signals: Vec<Signal<B::Handle>>,
}

impl<B: Backend> Emitter<B> {
    /// Run INIT: capture the root and register every entry
    ///
    /// Fails if the root is missing or a registration hits a native error;
    /// in that case every handle opened so far is closed again.
    pub fn init(
        root: WatchRoot,
        backend: Arc<B>,
        sink: EventSink,
        state: Arc<StateCell>,
    ) -> Result<Self> {
        state.set(EmitterState::Init);
        let descriptors = Arc::new(DescriptorSet::new(Arc::clone(&backend)));
        let mut emitter = Self {
            snapshot: Snapshot::empty(&root.path),
            root,
            backend,
            descriptors,
            sink,
            state,
            signals: Vec::new(),
        };

        if let Err(err) = emitter.capture_and_register() {
            emitter.teardown();
            emitter.state.set(EmitterState::Stopped);
            return Err(err);
        }

        debug!(
            watch = %emitter.sink.watch(),
            entries = emitter.snapshot.len(),
            descriptors = emitter.descriptors.len(),
            "Initialized {}",
            emitter.root.path.display()
        );
        Ok(emitter)
    }

    fn capture_and_register(&mut self) -> Result<()> {
        let descriptors = Arc::clone(&self.descriptors);
        let mut vanished = Vec::new();

        self.snapshot = Snapshot::capture_with(&self.root.path, self.root.recursive, |entry| {
            if descriptors.add(&entry.path, entry.is_directory)? == Registration::Vanished {
                vanished.push((entry.path.clone(), entry.is_directory));
            }
            Ok::<(), WatchError>(())
        })?;

        for (path, is_directory) in vanished {
            self.sink.send(CanonicalEvent::created(path.clone(), is_directory));
            self.sink.send(CanonicalEvent::deleted(path.clone(), is_directory));
            self.snapshot.remove_tree(&path);
        }
        Ok(())
    }

    pub fn root(&self) -> &WatchRoot {
        &self.root
    }

    /// Type-erased view of the descriptor set
    pub fn watched(&self) -> Arc<dyn WatchedPaths> {
        self.descriptors.clone()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Loop until `stop` is raised or the backend fails, then tear down
    pub fn run(mut self, stop: StopToken) -> Result<()> {
        self.state.set(EmitterState::Running);
        info!(watch = %self.sink.watch(), "Watching {}", self.root.path.display());

        let result = loop {
            if stop.is_stopped() {
                break Ok(());
            }
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break Ok(()),
                Err(err) => {
                    error!(watch = %self.sink.watch(), "Emitter failed: {}", err);
                    break Err(err);
                }
            }
        };

        self.state.set(EmitterState::Stopping);
        self.teardown();
        self.state.set(EmitterState::Stopped);
        info!(watch = %self.sink.watch(), "Stopped watching {}", self.root.path.display());
        result
    }

    /// One wait plus everything it triggers
    fn step(&mut self) -> Result<Flow> {
        let mut signals = mem::take(&mut self.signals);
        signals.clear();

        if let Err(err) = self.backend.wait(self.root.timeout, &mut signals) {
            self.signals = signals;
            return match classify_wait_error(&err) {
                WaitFailure::Retry => Ok(Flow::Continue),
                WaitFailure::Closed => {
                    debug!("Native wait handle closed: {}", err);
                    Ok(Flow::Exit)
                }
                WaitFailure::Fatal => Err(WatchError::FatalNative(err)),
            };
        }

        let mut deferred = Deferred::default();
        for signal in signals.drain(..) {
            self.dispatch(signal, &mut deferred)?;
        }
        self.signals = signals;

        if !deferred.is_empty() {
            self.resync(&deferred)?;
        }
        Ok(Flow::Continue)
    }

    fn dispatch(&mut self, signal: Signal<B::Handle>, deferred: &mut Deferred) -> Result<()> {
        let (handle, flags) = match signal {
            Signal::Overflow => {
                warn!("Native queue overflowed, rescanning {}", self.root.path.display());
                deferred.rescan = true;
                return Ok(());
            }
            Signal::Vnode { handle, flags } => (handle, flags),
        };

        let descriptor = match self.descriptors.get_by_handle(handle) {
            Ok(descriptor) => descriptor,
            Err(_) => {
                trace!(?handle, ?flags, "Dropping signal for unregistered handle");
                return Ok(());
            }
        };
        let WatchDescriptor {
            path, is_directory, ..
        } = &descriptor;

        for class in classify(flags, *is_directory) {
            match class {
                SignalClass::Deleted => {
                    self.emit(CanonicalEvent::deleted(path.clone(), *is_directory))?;
                    self.snapshot.remove_tree(path);
                    break;
                }
                SignalClass::AttributeModified => {
                    self.emit(CanonicalEvent::attribute_modified(path.clone(), *is_directory))?;
                }
                SignalClass::Modified if *is_directory => {
                    deferred.dirs_modified.insert(path.clone());
                }
                SignalClass::Modified => {
                    self.emit(CanonicalEvent::modified(path.clone(), false))?;
                }
                SignalClass::RenameCandidate if *is_directory => {
                    deferred.dirs_renamed.insert(path.clone());
                }
                SignalClass::RenameCandidate => {
                    self.resolve_file_rename(path, deferred)?;
                }
            }
        }
        Ok(())
    }

    /// Try to find a renamed file next to where it used to be
    fn resolve_file_rename(&mut self, path: &Path, deferred: &mut Deferred) -> Result<()> {
        let prior = match self.snapshot.stat(path) {
            Ok(entry) => entry.clone(),
            Err(_) => {
                // Renamed before any snapshot saw it
                self.emit(CanonicalEvent::created(path.to_path_buf(), false))?;
                self.emit(CanonicalEvent::deleted(path.to_path_buf(), false))?;
                return Ok(());
            }
        };

        let Some(parent) = path.parent() else {
            deferred.files_renamed.insert(path.to_path_buf());
            return Ok(());
        };

        match Snapshot::capture(parent, false) {
            Ok(siblings) => {
                let found = siblings
                    .path_for_inode(prior.inode)
                    .ok()
                    .filter(|dest| *dest != path)
                    .and_then(|dest| siblings.stat(dest).ok())
                    .cloned();
                if let Some(entry) = found {
                    let dest = entry.path.clone();
                    self.displace(&dest)?;
                    self.snapshot.rename_tree(path, &dest);
                    self.snapshot.insert(entry);
                    self.emit(CanonicalEvent::moved(path.to_path_buf(), dest, false))?;
                    return Ok(());
                }
            }
            Err(err) => trace!("Cannot scan parent of {}: {}", path.display(), err),
        }

        deferred.files_renamed.insert(path.to_path_buf());
        Ok(())
    }

    /// Report whatever a move onto `dest` is about to replace
    ///
    /// The replaced node's own DELETE may still be queued behind the rename;
    /// once its descriptor is gone that signal is dropped as unknown.
    fn displace(&mut self, dest: &Path) -> Result<()> {
        let Ok(replaced) = self.snapshot.stat(dest) else {
            return Ok(());
        };
        let is_directory = replaced.is_directory;
        self.emit(CanonicalEvent::deleted(dest.to_path_buf(), is_directory))?;
        self.snapshot.remove_tree(dest);
        Ok(())
    }

    fn resync(&mut self, deferred: &Deferred) -> Result<()> {
        let fresh = match Snapshot::capture(&self.root.path, self.root.recursive) {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_not_found() => Snapshot::empty(&self.root.path),
            Err(err) => return Err(err.into()),
        };

        let old = mem::replace(&mut self.snapshot, fresh);
        let plan = reconcile::plan(&old, &self.snapshot, deferred);
        debug!(
            events = plan.events.len(),
            rescan = deferred.rescan,
            "Resynced {}",
            self.root.path.display()
        );

        for event in &plan.events {
            self.emit(event.clone())?;
        }
        self.sync_descriptors(&old, &plan)
    }

    /// Make the descriptor set match the adopted snapshot
    fn sync_descriptors(&mut self, old: &Snapshot, plan: &ResyncPlan) -> Result<()> {
        let stale: Vec<PathBuf> = self
            .descriptors
            .paths()
            .into_iter()
            .filter(|path| !self.snapshot.contains(path))
            .collect();
        for path in &stale {
            self.descriptors.remove(path);
        }

        let missing: Vec<(PathBuf, bool)> = self
            .snapshot
            .entries()
            .filter(|entry| !self.descriptors.contains(&entry.path))
            .map(|entry| (entry.path.clone(), entry.is_directory))
            .collect();
        for (path, is_directory) in missing {
            let known = plan.is_known(&path, old);
            self.register(&path, is_directory, known)?;
        }
        Ok(())
    }

    /// Register `path`; a path that is already gone is reported instead
    fn register(&mut self, path: &Path, is_directory: bool, announced: bool) -> Result<()> {
        if self.descriptors.add(path, is_directory)? == Registration::Vanished {
            debug!("{} vanished before it could be watched", path.display());
            if !announced {
                self.sink.send(CanonicalEvent::created(path.to_path_buf(), is_directory));
            }
            self.sink.send(CanonicalEvent::deleted(path.to_path_buf(), is_directory));
            self.snapshot.remove_tree(path);
        }
        Ok(())
    }

    /// Queue `event`, then re-key the descriptor set for it
    fn emit(&mut self, event: CanonicalEvent) -> Result<()> {
        trace!(watch = %self.sink.watch(), "{}", event);
        let is_directory = event.is_directory;
        let change = event.change.clone();
        self.sink.send(event);

        match change {
            Change::Deleted(path) => {
                self.descriptors.remove(&path);
            }
            Change::Moved { src, dest } => {
                self.descriptors.remove(&src);
                // A handle still keyed to `dest` belongs to the replaced node
                self.descriptors.remove(&dest);
                self.register(&dest, is_directory, true)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.descriptors.clear();
        self.backend.shutdown();
    }
}

impl<B: Backend> Drop for Emitter<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
