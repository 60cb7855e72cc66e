//! inotify backend (Linux)
//!
//! One inotify watch per path. Self events on a watch translate directly
//! (`IN_DELETE_SELF` is DELETE, `IN_MOVE_SELF` is RENAME, ...); events
//! about a directory's children become WRITE on the directory, which is
//! what kqueue reports for the same operations.

use super::{closed_error, coalesce, Backend, BackendKind, Signal, SignalFlags};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, InotifyEvent, WatchDescriptor};
use parking_lot::RwLock;
use std::io;
use std::os::fd::AsFd;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace};

/// Platform constants for the inotify backend
#[derive(Debug, Clone, Copy)]
pub struct InotifyTable {
    pub init_flags: InitFlags,
    /// Mask passed to `inotify_add_watch` for every path
    pub watch_mask: AddWatchFlags,
    /// Child events that count as a write on the watched directory
    pub child_mask: AddWatchFlags,
    /// `(self event, signal flag)` pairs
    pub self_events: [(AddWatchFlags, SignalFlags); 4],
}

pub static INOTIFY_TABLE: InotifyTable = InotifyTable {
    init_flags: InitFlags::IN_NONBLOCK.union(InitFlags::IN_CLOEXEC),
    watch_mask: AddWatchFlags::IN_MODIFY
        .union(AddWatchFlags::IN_ATTRIB)
        .union(AddWatchFlags::IN_CREATE)
        .union(AddWatchFlags::IN_DELETE)
        .union(AddWatchFlags::IN_MOVED_FROM)
        .union(AddWatchFlags::IN_MOVED_TO)
        .union(AddWatchFlags::IN_DELETE_SELF)
        .union(AddWatchFlags::IN_MOVE_SELF)
        .union(AddWatchFlags::IN_DONT_FOLLOW),
    child_mask: AddWatchFlags::IN_CREATE
        .union(AddWatchFlags::IN_DELETE)
        .union(AddWatchFlags::IN_MOVED_FROM)
        .union(AddWatchFlags::IN_MOVED_TO),
    self_events: [
        (AddWatchFlags::IN_DELETE_SELF, SignalFlags::DELETE),
        (AddWatchFlags::IN_MOVE_SELF, SignalFlags::RENAME),
        (AddWatchFlags::IN_ATTRIB, SignalFlags::ATTRIB),
        (AddWatchFlags::IN_MODIFY, SignalFlags::WRITE),
    ],
};

impl InotifyTable {
    /// Flags for one native event; `named` is true for child events
    pub fn translate(&self, mask: AddWatchFlags, named: bool) -> SignalFlags {
        if named {
            if mask.intersects(self.child_mask) {
                SignalFlags::WRITE
            } else {
                SignalFlags::empty()
            }
        } else {
            self.self_events
                .iter()
                .filter(|(event, _)| mask.intersects(*event))
                .fold(SignalFlags::empty(), |acc, (_, flag)| acc | *flag)
        }
    }

    fn signal(&self, event: &InotifyEvent) -> Option<Signal<WatchDescriptor>> {
        if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
            return Some(Signal::Overflow);
        }
        if event.mask.contains(AddWatchFlags::IN_IGNORED) {
            return None;
        }
        let flags = self.translate(event.mask, event.name.is_some());
        (!flags.is_empty()).then_some(Signal::Vnode {
            handle: event.wd,
            flags,
        })
    }
}

pub struct InotifyBackend {
    /// `None` once shut down
    inotify: RwLock<Option<Inotify>>,
    table: &'static InotifyTable,
    max_events: usize,
}

impl InotifyBackend {
    pub fn new(table: &'static InotifyTable, max_events: usize) -> io::Result<Self> {
        let inotify = Inotify::init(table.init_flags)?;
        debug!("Opened inotify instance");
        Ok(Self {
            inotify: RwLock::new(Some(inotify)),
            table,
            max_events: max_events.max(1),
        })
    }
}

/// Wait until the instance is readable; false on timeout
fn readable(inotify: &Inotify, timeout: Duration) -> io::Result<bool> {
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    let mut fds = [PollFd::new(inotify.as_fd(), PollFlags::POLLIN)];
    let ready = poll(&mut fds, PollTimeout::from(millis))?;
    let revents = fds[0].revents().unwrap_or(PollFlags::empty());
    if revents.contains(PollFlags::POLLNVAL) {
        return Err(Errno::EBADF.into());
    }
    Ok(ready > 0)
}

impl Backend for InotifyBackend {
    type Handle = WatchDescriptor;

    fn kind(&self) -> BackendKind {
        BackendKind::Inotify
    }

    fn open(&self, path: &Path, _is_directory: bool) -> io::Result<WatchDescriptor> {
        let inotify = self.inotify.read();
        let inotify = inotify.as_ref().ok_or_else(closed_error)?;

        let wd = inotify.add_watch(path, self.table.watch_mask)?;
        trace!(?wd, "Added inotify watch for {}", path.display());
        Ok(wd)
    }

    fn close(&self, wd: WatchDescriptor) -> io::Result<()> {
        let inotify = self.inotify.read();
        let inotify = inotify.as_ref().ok_or_else(closed_error)?;
        // EINVAL here means the kernel already dropped the watch
        inotify.rm_watch(wd)?;
        Ok(())
    }

    fn wait(
        &self,
        timeout: Duration,
        signals: &mut Vec<Signal<WatchDescriptor>>,
    ) -> io::Result<()> {
        let inotify = self.inotify.read();
        let inotify = inotify.as_ref().ok_or_else(closed_error)?;
        if !readable(inotify, timeout)? {
            return Ok(());
        }

        while signals.len() < self.max_events {
            let events = match inotify.read_events() {
                Ok(events) => events,
                Err(Errno::EAGAIN) => break,
                Err(errno) => return Err(errno.into()),
            };
            if events.is_empty() {
                break;
            }
            signals.extend(events.iter().filter_map(|event| self.table.signal(event)));
        }

        coalesce(signals);
        Ok(())
    }

    fn shutdown(&self) {
        if self.inotify.write().take().is_some() {
            debug!("Closed inotify instance");
        }
    }
}
