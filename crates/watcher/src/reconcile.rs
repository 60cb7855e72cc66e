//! Resync planning
//!
//! Signals that cannot be resolved on the spot (directory writes, directory
//! renames, file renames whose destination was not found next door, queue
//! overflows) are collected into a [`Deferred`] set. After each batch the
//! emitter captures a fresh snapshot and asks [`plan`] which events take the
//! working snapshot to the fresh one, in an order a consumer can replay.

use ahash::AHashSet;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tidewatch_core::{resolve, resolve_all, CanonicalEvent, Move, Resolution, Snapshot};

/// Suspects collected while dispatching one batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Deferred {
    pub dirs_renamed: BTreeSet<PathBuf>,
    pub files_renamed: BTreeSet<PathBuf>,
    pub dirs_modified: BTreeSet<PathBuf>,
    /// The native queue overflowed; compare everything
    pub rescan: bool,
}

impl Deferred {
    pub fn is_empty(&self) -> bool {
        !self.rescan
            && self.dirs_renamed.is_empty()
            && self.files_renamed.is_empty()
            && self.dirs_modified.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ResyncPlan {
    /// Ordered events to emit
    pub events: Vec<CanonicalEvent>,
    /// Moves kept after implied descendant moves were dropped
    pub moves: Vec<Move>,
    announced: AHashSet<PathBuf>,
}

impl ResyncPlan {
    /// Whether a consumer already knows `path` exists
    ///
    /// Decides if a path that vanishes before it can be registered needs a
    /// `Created` ahead of its `Deleted`.
    pub fn is_known(&self, path: &Path, old: &Snapshot) -> bool {
        self.announced.contains(path)
            || old.contains(path)
            || self.moves.iter().any(|m| path.starts_with(&m.dest))
    }
}

/// Work out the events that take `old` to `new`
pub fn plan(old: &Snapshot, new: &Snapshot, deferred: &Deferred) -> ResyncPlan {
    let mut resolution = if deferred.rescan {
        resolve_all(old, new)
    } else {
        resolve_suspects(old, new, deferred)
    };

    drop_implied_moves(&mut resolution.moved);
    order(resolution)
}

fn resolve_suspects(old: &Snapshot, new: &Snapshot, deferred: &Deferred) -> Resolution {
    // Renames first, so directory contents are examined at their new home
    let renamed = deferred
        .dirs_renamed
        .iter()
        .chain(&deferred.files_renamed)
        .map(PathBuf::as_path);
    let mut resolution = resolve(old, new, renamed);

    let dir_moves: Vec<Move> = resolution
        .moved
        .iter()
        .filter(|m| m.is_directory)
        .cloned()
        .collect();

    let mut suspects: Vec<PathBuf> = Vec::new();
    for dir in &deferred.dirs_modified {
        suspects.extend(old.children(dir).map(|e| e.path.clone()));
        let current = relocate(dir, &dir_moves);
        suspects.extend(new.children(&current).map(|e| e.path.clone()));
    }

    // Paths that appeared or disappeared while their signal was still in
    // flight (it lands in the next batch, against the adopted snapshot)
    suspects.extend(new.paths().filter(|p| !old.contains(p)).map(Path::to_path_buf));
    suspects.extend(old.paths().filter(|p| !new.contains(p)).map(Path::to_path_buf));

    resolution.merge(resolve(old, new, suspects.iter().map(PathBuf::as_path)));
    resolution
}

/// Where `dir` lives after the given directory moves
fn relocate(dir: &Path, dir_moves: &[Move]) -> PathBuf {
    dir_moves
        .iter()
        .filter(|m| m.covers_src(dir))
        .max_by_key(|m| m.src.components().count())
        .and_then(|m| m.translate(dir))
        .unwrap_or_else(|| dir.to_path_buf())
}

/// Remove moves that only restate a directory move for its descendants
fn drop_implied_moves(moves: &mut Vec<Move>) {
    let dir_moves: Vec<Move> = moves.iter().filter(|m| m.is_directory).cloned().collect();
    moves.retain(|m| {
        !dir_moves.iter().any(|d| {
            d.src != m.src
                && d.covers_src(&m.src)
                && d.translate(&m.src).as_deref() == Some(m.dest.as_path())
        })
    });
}

/// A move may not land on a path another pending move still has to vacate
fn order_moves(mut pending: Vec<Move>) -> Vec<Move> {
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|m| !pending.iter().any(|o| o.src != m.src && o.src == m.dest))
            .unwrap_or(0);
        ordered.push(pending.remove(ready));
    }
    ordered
}

/// Deletions (deepest first), directories that moves land in, moves,
/// then remaining creations (parents first)
fn order(resolution: Resolution) -> ResyncPlan {
    let Resolution {
        mut created,
        mut deleted,
        moved,
    } = resolution;

    deleted.sort_by(|a, b| b.path.cmp(&a.path));
    created.sort_by(|a, b| a.path.cmp(&b.path));
    let moves = order_moves(moved);

    let vacated: AHashSet<&Path> = moves.iter().map(|m| m.src.as_path()).collect();
    let (landing, rest): (Vec<_>, Vec<_>) = created.into_iter().partition(|entry| {
        entry.is_directory
            && !vacated.contains(entry.path.as_path())
            && moves
                .iter()
                .any(|m| m.dest != entry.path && m.dest.starts_with(&entry.path))
    });

    let mut events = Vec::with_capacity(deleted.len() + landing.len() + moves.len() + rest.len());
    let mut announced = AHashSet::new();

    events.extend(
        deleted
            .iter()
            .map(|e| CanonicalEvent::deleted(e.path.clone(), e.is_directory)),
    );
    for entry in &landing {
        announced.insert(entry.path.clone());
        events.push(CanonicalEvent::created(entry.path.clone(), entry.is_directory));
    }
    for m in &moves {
        announced.insert(m.dest.clone());
        events.push(CanonicalEvent::moved(m.src.clone(), m.dest.clone(), m.is_directory));
    }
    for entry in &rest {
        announced.insert(entry.path.clone());
        events.push(CanonicalEvent::created(entry.path.clone(), entry.is_directory));
    }

    ResyncPlan {
        events,
        moves,
        announced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tidewatch_core::EventType;

    fn setup() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = fs::canonicalize(temp_dir.path()).unwrap();
        (temp_dir, root)
    }

    fn modified(dirs: &[&Path]) -> Deferred {
        Deferred {
            dirs_modified: dirs.iter().map(|d| d.to_path_buf()).collect(),
            ..Deferred::default()
        }
    }

    #[test]
    fn test_empty_deferred() {
        assert!(Deferred::default().is_empty());
        let deferred = Deferred {
            rescan: true,
            ..Deferred::default()
        };
        assert!(!deferred.is_empty());
    }

    #[test]
    fn test_directory_rename_is_a_single_move() {
        let (_temp_dir, root) = setup();
        fs::create_dir_all(root.join("dir/sub")).unwrap();
        fs::write(root.join("dir/f.txt"), b"x").unwrap();
        fs::write(root.join("dir/sub/g.txt"), b"y").unwrap();
        let old = Snapshot::capture(&root, true).unwrap();

        fs::rename(root.join("dir"), root.join("dir2")).unwrap();
        let new = Snapshot::capture(&root, true).unwrap();

        let mut deferred = modified(&[&root]);
        deferred.dirs_renamed.insert(root.join("dir"));
        let plan = plan(&old, &new, &deferred);

        assert_eq!(
            plan.events,
            vec![CanonicalEvent::moved(root.join("dir"), root.join("dir2"), true)]
        );
        assert!(plan.is_known(&root.join("dir2/sub/g.txt"), &old));
    }

    #[test]
    fn test_modified_dir_is_examined_at_new_location() {
        let (_temp_dir, root) = setup();
        fs::create_dir(root.join("dir")).unwrap();
        let old = Snapshot::capture(&root, true).unwrap();

        fs::rename(root.join("dir"), root.join("dir2")).unwrap();
        fs::write(root.join("dir2/new.txt"), b"x").unwrap();
        let new = Snapshot::capture(&root, true).unwrap();

        let mut deferred = modified(&[&root, &root.join("dir")]);
        deferred.dirs_renamed.insert(root.join("dir"));
        let plan = plan(&old, &new, &deferred);

        assert_eq!(
            plan.events,
            vec![
                CanonicalEvent::moved(root.join("dir"), root.join("dir2"), true),
                CanonicalEvent::created(root.join("dir2/new.txt"), false),
            ]
        );
    }

    #[test]
    fn test_new_directory_precedes_move_into_it() {
        let (_temp_dir, root) = setup();
        fs::write(root.join("a.txt"), b"x").unwrap();
        let old = Snapshot::capture(&root, true).unwrap();

        fs::create_dir(root.join("n")).unwrap();
        fs::rename(root.join("a.txt"), root.join("n/a.txt")).unwrap();
        let new = Snapshot::capture(&root, true).unwrap();

        let plan = plan(&old, &new, &modified(&[&root]));

        assert_eq!(
            plan.events,
            vec![
                CanonicalEvent::created(root.join("n"), true),
                CanonicalEvent::moved(root.join("a.txt"), root.join("n/a.txt"), false),
            ]
        );
    }

    #[test]
    fn test_chained_moves_are_ordered() {
        let (_temp_dir, root) = setup();
        fs::write(root.join("a"), b"a").unwrap();
        fs::write(root.join("c"), b"c").unwrap();
        let old = Snapshot::capture(&root, true).unwrap();

        fs::rename(root.join("a"), root.join("b")).unwrap();
        fs::rename(root.join("c"), root.join("a")).unwrap();
        let new = Snapshot::capture(&root, true).unwrap();

        let plan = plan(&old, &new, &modified(&[&root]));
        let moves: Vec<_> = plan
            .events
            .iter()
            .filter(|e| e.event_type() == EventType::Moved)
            .cloned()
            .collect();

        assert_eq!(
            moves,
            vec![
                CanonicalEvent::moved(root.join("a"), root.join("b"), false),
                CanonicalEvent::moved(root.join("c"), root.join("a"), false),
            ]
        );
    }

    #[test]
    fn test_deletions_deepest_first() {
        let (_temp_dir, root) = setup();
        fs::create_dir(root.join("d")).unwrap();
        fs::write(root.join("d/f.txt"), b"x").unwrap();
        let old = Snapshot::capture(&root, true).unwrap();

        fs::remove_dir_all(root.join("d")).unwrap();
        let new = Snapshot::capture(&root, true).unwrap();

        let plan = plan(&old, &new, &modified(&[&root]));

        assert_eq!(
            plan.events,
            vec![
                CanonicalEvent::deleted(root.join("d/f.txt"), false),
                CanonicalEvent::deleted(root.join("d"), true),
            ]
        );
    }

    #[test]
    fn test_new_tree_is_created_parents_first() {
        let (_temp_dir, root) = setup();
        let old = Snapshot::capture(&root, true).unwrap();

        fs::create_dir_all(root.join("x/y")).unwrap();
        fs::write(root.join("x/y/z.txt"), b"z").unwrap();
        let new = Snapshot::capture(&root, true).unwrap();

        let plan = plan(&old, &new, &modified(&[&root]));

        assert_eq!(
            plan.events,
            vec![
                CanonicalEvent::created(root.join("x"), true),
                CanonicalEvent::created(root.join("x/y"), true),
                CanonicalEvent::created(root.join("x/y/z.txt"), false),
            ]
        );
        assert!(plan.is_known(&root.join("x/y/z.txt"), &old));
        assert!(!plan.is_known(&root.join("x/other"), &old));
    }

    #[test]
    fn test_rescan_compares_everything() {
        let (_temp_dir, root) = setup();
        fs::create_dir(root.join("dir")).unwrap();
        fs::write(root.join("dir/f.txt"), b"x").unwrap();
        let old = Snapshot::capture(&root, true).unwrap();

        fs::rename(root.join("dir"), root.join("moved")).unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();
        let new = Snapshot::capture(&root, true).unwrap();

        let deferred = Deferred {
            rescan: true,
            ..Deferred::default()
        };
        let plan = plan(&old, &new, &deferred);

        assert_eq!(
            plan.events,
            vec![
                CanonicalEvent::moved(root.join("dir"), root.join("moved"), true),
                CanonicalEvent::created(root.join("b.txt"), false),
            ]
        );
    }

    #[test]
    fn test_relocate_prefers_deepest_move() {
        let moves = vec![
            Move {
                src: "/w/a".into(),
                dest: "/w/b".into(),
                is_directory: true,
            },
            Move {
                src: "/w/a/inner".into(),
                dest: "/w/elsewhere".into(),
                is_directory: true,
            },
        ];
        assert_eq!(relocate(Path::new("/w/a/inner/x"), &moves), PathBuf::from("/w/elsewhere/x"));
        assert_eq!(relocate(Path::new("/w/a/y"), &moves), PathBuf::from("/w/b/y"));
        assert_eq!(relocate(Path::new("/w/z"), &moves), PathBuf::from("/w/z"));
    }
}
