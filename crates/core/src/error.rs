use crate::snapshot::InodeKey;
use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Inode {0} is not tracked by this snapshot")]
    InodeNotFound(InodeKey),

    #[error("Failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SnapshotError {
    /// True when the error means the path simply is not there (any more)
    pub fn is_not_found(&self) -> bool {
        match self {
            SnapshotError::NotFound(_) | SnapshotError::InodeNotFound(_) => true,
            SnapshotError::Walk { source, .. } | SnapshotError::Io(source) => {
                source.kind() == io::ErrorKind::NotFound
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
