//! File system watching for Tidewatch
//!
//! This crate provides per-path native file watching with:
//! - kqueue (`EVFILT_VNODE`) on macOS and the BSDs, inotify on Linux
//! - A portable fallback on the `notify` crate
//! - Snapshot-backed rename resolution into a canonical event stream
//! - Overflow recovery by full rescan
//! - A multi-root [`Observer`] over one shared event queue

pub mod config;
pub mod descriptor;
pub mod emitter;
pub mod error;
pub mod observer;
pub mod platform;
pub mod queue;
pub mod reconcile;
pub mod watch;

#[cfg(test)]
mod testing;

pub use config::{BackendChoice, WatcherConfig};
pub use descriptor::{DescriptorSet, Registration, WatchDescriptor, WatchedPaths};
pub use emitter::{EmitterState, StopToken, WatchRoot};
pub use error::{Result, WatchError};
pub use observer::Observer;
pub use platform::{Backend, BackendKind, Signal, SignalFlags};
pub use queue::{EventQueue, EventSink, ObservedEvent, WatchId};
pub use watch::{start, WatchHandle};

pub use tidewatch_core::{CanonicalEvent, Change, EventRecord, EventType};
