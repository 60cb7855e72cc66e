//! Point-in-time directory snapshots
//!
//! A snapshot records one [`DirectoryEntry`] per reachable path below a root
//! plus a reverse index from file identity to path. The reverse index is what
//! makes rename detection possible: a path that disappeared in one snapshot
//! and an inode that shows up somewhere else in the next one are the same
//! file.

use crate::error::{Result, SnapshotError};
use ahash::AHashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, Metadata};
use std::io;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{trace, warn};
use walkdir::WalkDir;

/// Platform file identity, stable across renames within one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeKey {
    /// Device the file lives on
    pub dev: u64,
    /// Inode number on that device
    pub ino: u64,
}

impl InodeKey {
    /// Create a key from raw device and inode numbers
    pub const fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Extract the identity of a file from its metadata
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self::new(metadata.dev(), metadata.ino())
    }

    /// Extract the identity of a file from its metadata
    ///
    /// Windows does not expose a stable file index through std, so the
    /// creation timestamp (preserved across renames) stands in for it.
    #[cfg(windows)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::windows::fs::MetadataExt;
        Self::new(0, metadata.creation_time())
    }
}

impl fmt::Display for InodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// Metadata recorded for one path in a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Absolute path of the entry
    pub path: PathBuf,
    /// Whether the entry is a directory (symlinks never are)
    pub is_directory: bool,
    /// File identity
    pub inode: InodeKey,
    /// Last modification time, if the platform reports one
    pub modified: Option<SystemTime>,
    /// Size in bytes
    pub size: u64,
}

impl DirectoryEntry {
    /// Build an entry from already fetched (non-following) metadata
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        Self {
            path,
            is_directory: metadata.is_dir(),
            inode: InodeKey::from_metadata(metadata),
            modified: metadata.modified().ok(),
            size: metadata.len(),
        }
    }

    /// Stat `path` on disk without following symlinks
    ///
    /// Fails with [`SnapshotError::NotFound`] if the path is absent.
    pub fn stat(path: &Path) -> Result<Self> {
        match fs::symlink_metadata(path) {
            Ok(metadata) => Ok(Self::from_metadata(path.to_path_buf(), &metadata)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(SnapshotError::NotFound(path.to_path_buf()))
            }
            Err(err) => Err(SnapshotError::Io(err)),
        }
    }
}

/// Complete path -> entry map of a tree at one instant
///
/// Entries are kept in path order, so a directory always precedes its
/// descendants when iterating.
#[derive(Debug, Clone)]
pub struct Snapshot {
    root: PathBuf,
    entries: BTreeMap<PathBuf, DirectoryEntry>,
    inodes: AHashMap<InodeKey, PathBuf>,
}

impl Snapshot {
    /// Create an empty snapshot for `root`
    pub fn empty(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            entries: BTreeMap::new(),
            inodes: AHashMap::new(),
        }
    }

    /// Walk `root` and record every reachable entry
    pub fn capture(root: &Path, recursive: bool) -> Result<Self> {
        Self::capture_with(root, recursive, |_| Ok::<(), SnapshotError>(()))
    }

    /// Walk `root`, calling `on_entry` for every entry as it is discovered
    ///
    /// Entries that vanish while the walk is in progress are omitted without
    /// error. Subtrees that cannot be read are skipped with a warning. Only a
    /// missing or unreadable root fails the capture; `on_entry` may abort the
    /// walk with its own error.
    pub fn capture_with<E, F>(
        root: &Path,
        recursive: bool,
        mut on_entry: F,
    ) -> std::result::Result<Self, E>
    where
        E: From<SnapshotError>,
        F: FnMut(&DirectoryEntry) -> std::result::Result<(), E>,
    {
        let mut snapshot = Self::empty(root);

        let mut walker = WalkDir::new(root).follow_links(false);
        if !recursive {
            walker = walker.max_depth(1);
        }

        for item in walker {
            let dirent = match item {
                Ok(dirent) => dirent,
                Err(err) => {
                    let depth = err.depth();
                    let path = err.path().map(Path::to_path_buf);
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
                    if depth == 0 {
                        return Err(root_error(root, source).into());
                    }
                    if source.kind() == io::ErrorKind::NotFound {
                        trace!("Entry vanished during walk: {:?}", path);
                    } else {
                        warn!("Skipping unreadable entry {:?}: {}", path, source);
                    }
                    continue;
                }
            };

            let metadata = match dirent.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
                    if dirent.depth() == 0 {
                        return Err(root_error(root, source).into());
                    }
                    if source.kind() != io::ErrorKind::NotFound {
                        warn!("Skipping {}: {}", dirent.path().display(), source);
                    }
                    continue;
                }
            };

            let entry = DirectoryEntry::from_metadata(dirent.into_path(), &metadata);
            on_entry(&entry)?;
            snapshot.insert(entry);
        }

        Ok(snapshot)
    }

    /// Root directory this snapshot was taken from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up the entry recorded for `path`
    pub fn stat(&self, path: &Path) -> Result<&DirectoryEntry> {
        self.entries
            .get(path)
            .ok_or_else(|| SnapshotError::NotFound(path.to_path_buf()))
    }

    /// Find the path currently recorded for `inode`
    ///
    /// Inode numbers are recycled by the filesystem, so an answer can be
    /// wrong after a fast delete/create pair, and hard links resolve to only
    /// one of their paths.
    pub fn path_for_inode(&self, inode: InodeKey) -> Result<&Path> {
        self.inodes
            .get(&inode)
            .map(PathBuf::as_path)
            .ok_or(SnapshotError::InodeNotFound(inode))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn contains_inode(&self, inode: InodeKey) -> bool {
        self.inodes.contains_key(&inode)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All recorded paths, parents before children
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys().map(PathBuf::as_path)
    }

    /// All recorded entries, parents before children
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.values()
    }

    /// Every entry strictly below `dir`
    pub fn descendants<'a>(
        &'a self,
        dir: &'a Path,
    ) -> impl Iterator<Item = &'a DirectoryEntry> + 'a {
        self.entries
            .range::<Path, _>((Bound::Excluded(dir), Bound::Unbounded))
            .take_while(move |(path, _)| path.starts_with(dir))
            .map(|(_, entry)| entry)
    }

    /// Direct children of `dir`
    pub fn children<'a>(
        &'a self,
        dir: &'a Path,
    ) -> impl Iterator<Item = &'a DirectoryEntry> + 'a {
        self.descendants(dir)
            .filter(move |entry| entry.path.parent() == Some(dir))
    }

    /// Record `entry`, replacing whatever was stored for its path
    pub fn insert(&mut self, entry: DirectoryEntry) {
        if let Some(previous) = self.entries.get(&entry.path) {
            let previous_inode = previous.inode;
            self.forget_inode(previous_inode, &entry.path);
        }
        self.inodes.insert(entry.inode, entry.path.clone());
        self.entries.insert(entry.path.clone(), entry);
    }

    /// Remove `path` and everything below it, returning the removed entries
    pub fn remove_tree(&mut self, path: &Path) -> Vec<DirectoryEntry> {
        let doomed: Vec<PathBuf> = self
            .entries
            .get(path)
            .map(|entry| entry.path.clone())
            .into_iter()
            .chain(self.descendants(path).map(|entry| entry.path.clone()))
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for doomed_path in doomed {
            if let Some(entry) = self.entries.remove(&doomed_path) {
                self.forget_inode(entry.inode, &entry.path);
                removed.push(entry);
            }
        }
        removed
    }

    /// Move `src` and its subtree to `dest`, keeping file identities
    ///
    /// Returns false when `src` is not recorded.
    pub fn rename_tree(&mut self, src: &Path, dest: &Path) -> bool {
        let moved = self.remove_tree(src);
        if moved.is_empty() {
            return false;
        }

        self.remove_tree(dest);
        for mut entry in moved {
            let relative = entry
                .path
                .strip_prefix(src)
                .map(Path::to_path_buf)
                .unwrap_or_default();
            entry.path = if relative.as_os_str().is_empty() {
                dest.to_path_buf()
            } else {
                dest.join(relative)
            };
            self.insert(entry);
        }
        true
    }

    fn forget_inode(&mut self, inode: InodeKey, path: &Path) {
        if self.inodes.get(&inode).map(PathBuf::as_path) == Some(path) {
            self.inodes.remove(&inode);
        }
    }
}

fn root_error(root: &Path, source: io::Error) -> SnapshotError {
    if source.kind() == io::ErrorKind::NotFound {
        SnapshotError::NotFound(root.to_path_buf())
    } else {
        SnapshotError::Walk {
            path: root.to_path_buf(),
            source,
        }
    }
}
