//! Platform-specific file watching implementations
//!
//! Every backend speaks the same raw vocabulary: it opens a notify-only
//! handle per path, blocks on its native wait primitive, and reports
//! [`Signal`]s whose flags mirror kqueue's vnode notes. The emitter never
//! sees native masks.

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod inotify;

pub mod portable;

use ahash::AHashMap;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::io;
use std::path::Path;
use std::time::Duration;

bitflags! {
    /// Raw change notes attached to one native handle
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SignalFlags: u32 {
        /// The watched node was unlinked
        const DELETE = 0x0001;
        /// Contents changed (for a directory: an entry was added or removed)
        const WRITE  = 0x0002;
        /// The node grew
        const EXTEND = 0x0004;
        /// Metadata changed
        const ATTRIB = 0x0008;
        /// Link count changed
        const LINK   = 0x0010;
        /// The node was renamed
        const RENAME = 0x0020;
        /// Access was revoked (volume unmounted)
        const REVOKE = 0x0040;
    }
}

/// One raw notification returned by a backend wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal<H> {
    /// Something happened to the node behind `handle`
    Vnode { handle: H, flags: SignalFlags },
    /// The native queue dropped events; nothing short of a rescan is reliable
    Overflow,
}

/// The fixed set of backends this crate ships
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// BSD / macOS kqueue with `EVFILT_VNODE`
    Kqueue,
    /// Linux inotify, one watch per path
    Inotify,
    /// The `notify` crate, one non-recursive watch per path
    Portable,
}

impl BackendKind {
    /// The native backend for the platform this binary was built for
    pub const fn native() -> Self {
        if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            BackendKind::Kqueue
        } else if cfg!(any(target_os = "linux", target_os = "android")) {
            BackendKind::Inotify
        } else {
            BackendKind::Portable
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Kqueue => "kqueue",
            BackendKind::Inotify => "inotify",
            BackendKind::Portable => "portable",
        };
        f.write_str(name)
    }
}

/// Contract every platform backend satisfies
///
/// `open` and `close` are called under the descriptor set's lock and must
/// be fast. `wait` is only ever called from the emitter thread and never
/// while that lock is held.
pub trait Backend: Send + Sync + 'static {
    /// Native token identifying one registration
    type Handle: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> BackendKind;

    /// Open a notify-only handle for `path`
    ///
    /// Must not mark the volume busy or block ordinary I/O on the path.
    fn open(&self, path: &Path, is_directory: bool) -> io::Result<Self::Handle>;

    /// Release a handle returned by [`Backend::open`]
    fn close(&self, handle: Self::Handle) -> io::Result<()>;

    /// Block up to `timeout` and append at most one batch of signals
    fn wait(&self, timeout: Duration, signals: &mut Vec<Signal<Self::Handle>>) -> io::Result<()>;

    /// Release the native wait handle; later waits fail with a closed error
    fn shutdown(&self);
}

/// Marker carried by errors that mean "the handle limit was reached"
#[derive(Debug)]
pub struct HandleLimitReached;

impl fmt::Display for HandleLimitReached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("native watch handle limit reached")
    }
}

impl std::error::Error for HandleLimitReached {}

/// Marker carried by wait errors after [`Backend::shutdown`]
#[derive(Debug)]
pub struct BackendClosed;

impl fmt::Display for BackendClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("native wait handle closed")
    }
}

impl std::error::Error for BackendClosed {}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, BackendClosed)
}

fn carries<T: std::error::Error + 'static>(err: &io::Error) -> bool {
    err.get_ref().map_or(false, |inner| inner.is::<T>())
}

/// Whether an `open` failure means the platform ran out of watch handles
pub fn is_exhaustion(err: &io::Error) -> bool {
    if carries::<HandleLimitReached>(err) {
        return true;
    }
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOSPC)
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Whether an `open` failure means the path is gone
pub fn is_vanished(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ENOTDIR)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// What a failed wait means for the emitter loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFailure {
    /// Interrupted; just wait again
    Retry,
    /// The wait handle is gone (teardown); leave the loop
    Closed,
    /// Anything else
    Fatal,
}

pub fn classify_wait_error(err: &io::Error) -> WaitFailure {
    if err.kind() == io::ErrorKind::Interrupted {
        return WaitFailure::Retry;
    }
    if carries::<BackendClosed>(err) {
        return WaitFailure::Closed;
    }
    #[cfg(unix)]
    {
        if err.raw_os_error() == Some(libc::EBADF) {
            return WaitFailure::Closed;
        }
    }
    WaitFailure::Fatal
}

/// Merge signals for the same handle into the first occurrence
///
/// Backends that report one native event per change (inotify, notify) use
/// this to get kqueue's one-note-set-per-handle shape. At most one
/// overflow signal is kept.
pub fn coalesce<H: Copy + Eq + Hash>(signals: &mut Vec<Signal<H>>) {
    let mut first: AHashMap<H, usize> = AHashMap::with_capacity(signals.len());
    let mut merged: Vec<Signal<H>> = Vec::with_capacity(signals.len());
    let mut overflowed = false;

    for signal in signals.drain(..) {
        match signal {
            Signal::Overflow => {
                if !overflowed {
                    overflowed = true;
                    merged.push(Signal::Overflow);
                }
            }
            Signal::Vnode { handle, flags } => match first.get(&handle) {
                Some(&index) => {
                    if let Signal::Vnode { flags: existing, .. } = &mut merged[index] {
                        *existing |= flags;
                    }
                }
                None => {
                    first.insert(handle, merged.len());
                    merged.push(Signal::Vnode { handle, flags });
                }
            },
        }
    }

    *signals = merged;
}
