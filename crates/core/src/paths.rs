//! Path canonicalization
//!
//! Every path that ends up as a map key goes through [`canonical`] first so
//! that equality comparisons between snapshot, descriptor and event paths
//! are reliable.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resolve `path` to a canonical absolute path
///
/// The path must exist. Symlinks in the path are resolved.
pub fn canonical(path: &Path) -> io::Result<PathBuf> {
    fs::canonicalize(path)
}
