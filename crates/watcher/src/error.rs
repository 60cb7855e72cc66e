use crate::platform::BackendKind;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tidewatch_core::SnapshotError;

#[derive(Debug, Error)]
pub enum WatchError {
    /// The platform refused another watch handle
    #[error("Native watch limit reached while watching {}: {source}", path.display())]
    ResourceExhaustion {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to watch {}: {source}", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not registered")]
    NotFound(String),

    /// The native wait primitive failed for a reason other than teardown
    #[error("Native wait failed: {0}")]
    FatalNative(#[source] io::Error),

    #[error("Failed to initialize {kind} backend: {source}")]
    BackendInit {
        kind: BackendKind,
        #[source]
        source: io::Error,
    },

    #[error("The {0} backend is not available on this platform")]
    UnsupportedBackend(BackendKind),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to spawn emitter thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Emitter thread panicked")]
    EmitterPanicked,

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl WatchError {
    /// Whether the watch root itself could not be found
    pub fn is_not_found(&self) -> bool {
        match self {
            WatchError::NotFound(_) => true,
            WatchError::Snapshot(err) => err.is_not_found(),
            WatchError::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
