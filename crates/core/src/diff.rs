//! Suspect-restricted snapshot diffing
//!
//! Native notifications say *where* to look, not *what* happened. The differ
//! takes the set of paths the emitter considers suspect and works out, for
//! those paths only, which were created, deleted or moved between two
//! snapshots. Moves are found by correlating inodes: a file whose identity
//! survives under a different path was renamed, not deleted and recreated.

use crate::event::CanonicalEvent;
use crate::snapshot::{DirectoryEntry, Snapshot};
use ahash::AHashSet;
use std::path::{Path, PathBuf};

/// A rename detected through inode correlation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub src: PathBuf,
    pub dest: PathBuf,
    pub is_directory: bool,
}

impl Move {
    /// Whether `path` sits at or below the source of this move
    pub fn covers_src(&self, path: &Path) -> bool {
        path.starts_with(&self.src)
    }

    /// Where `path` (at or below the source) ended up after this move
    pub fn translate(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.src).ok()?;
        if relative.as_os_str().is_empty() {
            Some(self.dest.clone())
        } else {
            Some(self.dest.join(relative))
        }
    }
}

/// Outcome of resolving a set of suspect paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Entries (from the new snapshot) that did not exist before
    pub created: Vec<DirectoryEntry>,
    /// Entries (from the old snapshot) whose identity is gone
    pub deleted: Vec<DirectoryEntry>,
    /// Identities found under a new path
    pub moved: Vec<Move>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty() && self.moved.is_empty()
    }

    /// Fold `other` into `self`, skipping anything already present
    pub fn merge(&mut self, other: Resolution) {
        for entry in other.deleted {
            if !self.deleted.iter().any(|e| e.path == entry.path) {
                self.deleted.push(entry);
            }
        }
        for entry in other.created {
            if !self.created.iter().any(|e| e.path == entry.path) {
                self.created.push(entry);
            }
        }
        for mv in other.moved {
            if !self.moved.iter().any(|m| m.src == mv.src) {
                self.moved.push(mv);
            }
        }
    }

    /// Events in a plain deleted, moved, created order
    pub fn to_events(&self) -> Vec<CanonicalEvent> {
        let deleted = self
            .deleted
            .iter()
            .map(|e| CanonicalEvent::deleted(e.path.clone(), e.is_directory));
        let moved = self
            .moved
            .iter()
            .map(|m| CanonicalEvent::moved(m.src.clone(), m.dest.clone(), m.is_directory));
        let created = self
            .created
            .iter()
            .map(|e| CanonicalEvent::created(e.path.clone(), e.is_directory));
        deleted.chain(moved).chain(created).collect()
    }
}

/// Resolve what happened to `suspects` between `old` and `new`
///
/// Only suspect paths are examined; an unchanged tree with no suspects
/// resolves to nothing. Suspects are processed in the order given and
/// duplicates are ignored.
pub fn resolve<'a, I>(old: &Snapshot, new: &Snapshot, suspects: I) -> Resolution
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut resolver = Resolver::new(old, new);
    for path in suspects {
        resolver.visit(path);
    }
    resolver.finish()
}

/// Resolve every path present in either snapshot
///
/// Used after the native queue overflowed and nothing can be trusted.
pub fn resolve_all(old: &Snapshot, new: &Snapshot) -> Resolution {
    let mut resolver = Resolver::new(old, new);
    for path in old.paths().chain(new.paths()) {
        resolver.visit(path);
    }
    resolver.finish()
}

struct Resolver<'s> {
    old: &'s Snapshot,
    new: &'s Snapshot,
    visited: AHashSet<PathBuf>,
    moved_from: AHashSet<PathBuf>,
    resolution: Resolution,
}

impl<'s> Resolver<'s> {
    fn new(old: &'s Snapshot, new: &'s Snapshot) -> Self {
        Self {
            old,
            new,
            visited: AHashSet::new(),
            moved_from: AHashSet::new(),
            resolution: Resolution::default(),
        }
    }

    fn visit(&mut self, path: &Path) {
        if !self.visited.insert(path.to_path_buf()) {
            return;
        }

        let (old, new) = (self.old, self.new);
        let before = old.stat(path).ok();
        let after = new.stat(path).ok();

        match (before, after) {
            (Some(before), Some(after)) if before.inode == after.inode => {}
            (Some(before), after) => {
                self.departure(before);
                if let Some(after) = after {
                    self.arrival(after);
                }
            }
            (None, Some(after)) => self.arrival(after),
            (None, None) => {}
        }
    }

    /// `before` no longer occupies its path: renamed or gone
    fn departure(&mut self, before: &DirectoryEntry) {
        let (old, new) = (self.old, self.new);
        if let Ok(dest) = new.path_for_inode(before.inode) {
            let already_there = old.stat(dest).ok().map(|e| e.inode) == Some(before.inode);
            if dest != before.path && !already_there {
                let dest = dest.to_path_buf();
                self.push_move(&before.path, dest, before.is_directory);
                return;
            }
        }
        self.push_deleted(before);
    }

    /// `after` occupies its path in the new snapshot: renamed here or new
    fn arrival(&mut self, after: &DirectoryEntry) {
        let (old, new) = (self.old, self.new);
        if let Ok(src) = old.path_for_inode(after.inode) {
            let still_there = new.stat(src).ok().map(|e| e.inode) == Some(after.inode);
            if src != after.path && !still_there {
                let src = src.to_path_buf();
                self.push_move(&src, after.path.clone(), after.is_directory);
                return;
            }
        }
        if !self.resolution.created.iter().any(|e| e.path == after.path) {
            self.resolution.created.push(after.clone());
        }
    }

    fn push_move(&mut self, src: &Path, dest: PathBuf, is_directory: bool) {
        if self.moved_from.insert(src.to_path_buf()) {
            self.resolution.moved.push(Move {
                src: src.to_path_buf(),
                dest,
                is_directory,
            });
        }
    }

    fn push_deleted(&mut self, before: &DirectoryEntry) {
        if !self.resolution.deleted.iter().any(|e| e.path == before.path) {
            self.resolution.deleted.push(before.clone());
        }
    }

    fn finish(self) -> Resolution {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::InodeKey;

    fn entry(path: &str, ino: u64, is_directory: bool) -> DirectoryEntry {
        DirectoryEntry {
            path: PathBuf::from(path),
            is_directory,
            inode: InodeKey::new(1, ino),
            modified: None,
            size: 0,
        }
    }

    fn snapshot(entries: &[(&str, u64, bool)]) -> Snapshot {
        let mut snapshot = Snapshot::empty(Path::new("/w"));
        for (path, ino, is_dir) in entries {
            snapshot.insert(entry(path, *ino, *is_dir));
        }
        snapshot
    }

    fn paths(list: &[&'static str]) -> Vec<&'static Path> {
        list.iter().map(|p| Path::new(*p)).collect()
    }

    #[test]
    fn test_self_diff_with_no_suspects_is_empty() {
        let snap = snapshot(&[("/w", 1, true), ("/w/a.txt", 2, false)]);
        let resolution = resolve(&snap, &snap, std::iter::empty());
        assert!(resolution.is_empty());
    }

    #[test]
    fn test_unchanged_suspect_resolves_to_nothing() {
        let snap = snapshot(&[("/w", 1, true), ("/w/a.txt", 2, false)]);
        let resolution = resolve(&snap, &snap, paths(&["/w/a.txt"]));
        assert!(resolution.is_empty());
    }

    #[test]
    fn test_rename_is_single_move() {
        let old = snapshot(&[("/w", 1, true), ("/w/a.txt", 2, false)]);
        let new = snapshot(&[("/w", 1, true), ("/w/b.txt", 2, false)]);

        let resolution = resolve(&old, &new, paths(&["/w/a.txt", "/w/b.txt"]));

        assert_eq!(
            resolution.moved,
            vec![Move {
                src: PathBuf::from("/w/a.txt"),
                dest: PathBuf::from("/w/b.txt"),
                is_directory: false,
            }]
        );
        assert!(resolution.created.is_empty());
        assert!(resolution.deleted.is_empty());
    }

    #[test]
    fn test_move_found_from_destination_side() {
        let old = snapshot(&[("/w/a.txt", 2, false)]);
        let new = snapshot(&[("/w/b.txt", 2, false)]);

        let resolution = resolve(&old, &new, paths(&["/w/b.txt"]));

        assert_eq!(resolution.moved.len(), 1);
        assert_eq!(resolution.moved[0].src, PathBuf::from("/w/a.txt"));
    }

    #[test]
    fn test_vanished_inode_is_deleted() {
        let old = snapshot(&[("/w/a.txt", 2, false)]);
        let new = snapshot(&[]);

        let resolution = resolve(&old, &new, paths(&["/w/a.txt"]));

        assert_eq!(resolution.deleted.len(), 1);
        assert!(resolution.moved.is_empty());
    }

    #[test]
    fn test_replaced_slot_is_deleted_then_created() {
        let old = snapshot(&[("/w/a.txt", 2, false)]);
        let new = snapshot(&[("/w/a.txt", 3, false)]);

        let resolution = resolve(&old, &new, paths(&["/w/a.txt"]));

        assert_eq!(resolution.deleted[0].path, PathBuf::from("/w/a.txt"));
        assert_eq!(resolution.created[0].path, PathBuf::from("/w/a.txt"));
        assert_eq!(resolution.created[0].inode, InodeKey::new(1, 3));
    }

    #[test]
    fn test_move_then_recreate_keeps_identity() {
        // mv a b; touch a
        let old = snapshot(&[("/w/a", 2, false)]);
        let new = snapshot(&[("/w/a", 3, false), ("/w/b", 2, false)]);

        let resolution = resolve(&old, &new, paths(&["/w/a", "/w/b"]));

        assert_eq!(resolution.moved.len(), 1);
        assert_eq!(resolution.moved[0].dest, PathBuf::from("/w/b"));
        assert_eq!(resolution.created.len(), 1);
        assert_eq!(resolution.created[0].path, PathBuf::from("/w/a"));
        assert!(resolution.deleted.is_empty());
    }

    #[test]
    fn test_move_over_existing_file() {
        // mv b a, overwriting a
        let old = snapshot(&[("/w/a", 2, false), ("/w/b", 3, false)]);
        let new = snapshot(&[("/w/a", 3, false)]);

        let resolution = resolve(&old, &new, paths(&["/w/a", "/w/b"]));

        assert_eq!(resolution.deleted.len(), 1);
        assert_eq!(resolution.deleted[0].path, PathBuf::from("/w/a"));
        assert_eq!(resolution.moved.len(), 1);
        assert_eq!(resolution.moved[0].src, PathBuf::from("/w/b"));
        assert!(resolution.created.is_empty());
    }

    #[test]
    fn test_hard_link_is_created_not_moved() {
        let old = snapshot(&[("/w/x", 2, false)]);
        let mut new = snapshot(&[("/w/y", 2, false)]);
        new.insert(entry("/w/x", 2, false));

        let resolution = resolve(&old, &new, paths(&["/w/y"]));

        assert!(resolution.moved.is_empty());
        assert_eq!(resolution.created.len(), 1);
    }

    #[test]
    fn test_only_suspects_are_examined() {
        let old = snapshot(&[("/w/a", 2, false)]);
        let new = snapshot(&[("/w/a", 2, false), ("/w/unrelated", 9, false)]);

        let resolution = resolve(&old, &new, paths(&["/w/a"]));
        assert!(resolution.is_empty());
    }

    #[test]
    fn test_resolve_all_covers_every_path() {
        let old = snapshot(&[("/w/a", 2, false), ("/w/gone", 4, false)]);
        let new = snapshot(&[("/w/b", 2, false), ("/w/new", 5, false)]);

        let resolution = resolve_all(&old, &new);

        assert_eq!(resolution.moved.len(), 1);
        assert_eq!(resolution.deleted.len(), 1);
        assert_eq!(resolution.created.len(), 1);
    }

    #[test]
    fn test_merge_deduplicates() {
        let old = snapshot(&[("/w/a", 2, false)]);
        let new = snapshot(&[("/w/b", 2, false)]);

        let mut first = resolve(&old, &new, paths(&["/w/a"]));
        let second = resolve(&old, &new, paths(&["/w/b"]));
        first.merge(second);

        assert_eq!(first.moved.len(), 1);
    }

    #[test]
    fn test_move_translate() {
        let mv = Move {
            src: PathBuf::from("/w/dir"),
            dest: PathBuf::from("/w/dir2"),
            is_directory: true,
        };
        assert_eq!(mv.translate(Path::new("/w/dir")), Some(PathBuf::from("/w/dir2")));
        assert_eq!(
            mv.translate(Path::new("/w/dir/f")),
            Some(PathBuf::from("/w/dir2/f"))
        );
        assert_eq!(mv.translate(Path::new("/w/other")), None);
        assert!(mv.covers_src(Path::new("/w/dir/f")));
        assert!(!mv.covers_src(Path::new("/w/dir2/f")));
    }
}
