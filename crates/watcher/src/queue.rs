//! Shared event queue
//!
//! Emitters push `(watch, event)` pairs; observers and other consumers pull
//! them. Events from one emitter keep their emission order.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::time::Duration;
use tidewatch_core::CanonicalEvent;
use tracing::trace;

/// Identity of one scheduled watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl WatchId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent {
    pub watch: WatchId,
    pub event: CanonicalEvent,
}

pub struct EventQueue {
    tx: Sender<ObservedEvent>,
    rx: Receiver<ObservedEvent>,
}

impl EventQueue {
    pub fn unbounded() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// A full queue blocks the emitter until a consumer catches up
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    /// A producer end tagged with `watch`
    pub fn sink(&self, watch: WatchId) -> EventSink {
        EventSink {
            watch,
            tx: self.tx.clone(),
        }
    }

    pub fn receiver(&self) -> &Receiver<ObservedEvent> {
        &self.rx
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ObservedEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<ObservedEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently queued
    pub fn drain(&self) -> Vec<ObservedEvent> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Producer end handed to one emitter
#[derive(Debug, Clone)]
pub struct EventSink {
    watch: WatchId,
    tx: Sender<ObservedEvent>,
}

impl EventSink {
    pub fn watch(&self) -> WatchId {
        self.watch
    }

    pub fn send(&self, event: CanonicalEvent) {
        let observed = ObservedEvent {
            watch: self.watch,
            event,
        };
        if let Err(err) = self.tx.send(observed) {
            trace!(watch = %self.watch, "Queue closed, dropping {}", err.0.event);
        }
    }
}
