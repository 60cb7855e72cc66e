//! kqueue backend (macOS and the BSDs)
//!
//! One descriptor per watched path, opened for event notification only,
//! with an `EVFILT_VNODE` filter registered at open time. Each kevent
//! carries the note set accumulated since the last wait (`EV_CLEAR`), so
//! signals arrive already coalesced per handle.

use super::{closed_error, Backend, BackendKind, Signal, SignalFlags};
use nix::fcntl::{self, OFlag};
use nix::sys::event::{EventFilter, EventFlag, FilterFlag, KEvent, Kqueue};
use nix::sys::stat::Mode;
use nix::unistd;
use parking_lot::RwLock;
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace};

/// Platform constants for the kqueue backend
#[derive(Debug, Clone, Copy)]
pub struct KqueueTable {
    /// Flags for `open(2)` on a watched path
    pub open_flags: OFlag,
    pub ev_flags: EventFlag,
    /// Notes requested for every watched node
    pub fflags: FilterFlag,
    /// `(native note, signal flag)` pairs
    pub notes: [(FilterFlag, SignalFlags); 7],
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
const OPEN_FLAGS: OFlag = OFlag::from_bits_retain(libc::O_EVTONLY | libc::O_SYMLINK)
    .union(OFlag::O_CLOEXEC);

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
const OPEN_FLAGS: OFlag = OFlag::O_RDONLY
    .union(OFlag::O_NONBLOCK)
    .union(OFlag::O_NOFOLLOW)
    .union(OFlag::O_CLOEXEC);

/// The table for the platform this binary was built for
pub static KQUEUE_TABLE: KqueueTable = KqueueTable {
    open_flags: OPEN_FLAGS,
    ev_flags: EventFlag::EV_ADD
        .union(EventFlag::EV_ENABLE)
        .union(EventFlag::EV_CLEAR),
    fflags: FilterFlag::NOTE_DELETE
        .union(FilterFlag::NOTE_WRITE)
        .union(FilterFlag::NOTE_EXTEND)
        .union(FilterFlag::NOTE_ATTRIB)
        .union(FilterFlag::NOTE_LINK)
        .union(FilterFlag::NOTE_RENAME)
        .union(FilterFlag::NOTE_REVOKE),
    notes: [
        (FilterFlag::NOTE_DELETE, SignalFlags::DELETE),
        (FilterFlag::NOTE_WRITE, SignalFlags::WRITE),
        (FilterFlag::NOTE_EXTEND, SignalFlags::EXTEND),
        (FilterFlag::NOTE_ATTRIB, SignalFlags::ATTRIB),
        (FilterFlag::NOTE_LINK, SignalFlags::LINK),
        (FilterFlag::NOTE_RENAME, SignalFlags::RENAME),
        (FilterFlag::NOTE_REVOKE, SignalFlags::REVOKE),
    ],
};

impl KqueueTable {
    pub fn translate(&self, fflags: FilterFlag) -> SignalFlags {
        self.notes
            .iter()
            .filter(|(note, _)| fflags.intersects(*note))
            .fold(SignalFlags::empty(), |acc, (_, flag)| acc | *flag)
    }

    fn vnode_filter(&self, fd: RawFd) -> KEvent {
        KEvent::new(
            fd as usize,
            EventFilter::EVFILT_VNODE,
            self.ev_flags,
            self.fflags,
            0,
            0,
        )
    }
}

fn empty_event() -> KEvent {
    KEvent::new(
        0,
        EventFilter::EVFILT_VNODE,
        EventFlag::empty(),
        FilterFlag::empty(),
        0,
        0,
    )
}

pub struct KqueueBackend {
    /// `None` once shut down
    queue: RwLock<Option<Kqueue>>,
    table: &'static KqueueTable,
    max_events: usize,
}

impl KqueueBackend {
    pub fn new(table: &'static KqueueTable, max_events: usize) -> io::Result<Self> {
        let queue = Kqueue::new()?;
        debug!("Opened kqueue");
        Ok(Self {
            queue: RwLock::new(Some(queue)),
            table,
            max_events: max_events.max(1),
        })
    }
}

impl Backend for KqueueBackend {
    type Handle = RawFd;

    fn kind(&self) -> BackendKind {
        BackendKind::Kqueue
    }

    fn open(&self, path: &Path, _is_directory: bool) -> io::Result<RawFd> {
        let queue = self.queue.read();
        let queue = queue.as_ref().ok_or_else(closed_error)?;

        let fd = fcntl::open(path, self.table.open_flags, Mode::empty())?;
        let changes = [self.table.vnode_filter(fd)];
        if let Err(errno) = queue.kevent(&changes, &mut [], None) {
            let _ = unistd::close(fd);
            return Err(errno.into());
        }

        trace!(fd, "Registered vnode filter for {}", path.display());
        Ok(fd)
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        // Closing the descriptor drops its filter from the queue
        unistd::close(fd)?;
        Ok(())
    }

    fn wait(&self, timeout: Duration, signals: &mut Vec<Signal<RawFd>>) -> io::Result<()> {
        let queue = self.queue.read();
        let queue = queue.as_ref().ok_or_else(closed_error)?;

        let mut events = vec![empty_event(); self.max_events];
        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        let n = queue.kevent(&[], &mut events, Some(ts))?;

        for event in &events[..n] {
            if event.flags().contains(EventFlag::EV_ERROR) {
                trace!(ident = event.ident(), "Skipping kevent error entry");
                continue;
            }
            let flags = self.table.translate(event.fflags());
            if flags.is_empty() {
                continue;
            }
            signals.push(Signal::Vnode {
                handle: event.ident() as RawFd,
                flags,
            });
        }
        Ok(())
    }

    fn shutdown(&self) {
        if self.queue.write().take().is_some() {
            debug!("Closed kqueue");
        }
    }
}
