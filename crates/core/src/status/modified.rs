//! Local modification checks against the pristine cache.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::adm::{pristine, AdmPaths};
use crate::entries::{self, Schedule};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, split_path, Depth, NodeKind, THIS_DIR};

/// Whether the working text of the file `path` differs from its pristine.
///
/// Unless `force`, a recorded timestamp and size matching the disk is taken
/// as "unmodified" without reading either text. A forced comparison also
/// verifies the pristine against its checksum. A missing working file
/// counts as unmodified.
pub fn text_modified(set: &LockSet, path: &Path, force: bool) -> Result<bool, WcError> {
    let path = normalize(path);
    let entry = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;

    let meta = match std::fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let Some(checksum) = entry.checksum.as_deref() else {
        // No text base: an added file without history is modified by definition.
        return Ok(true);
    };

    if !force {
        if let (Some(recorded), Some(size)) = (entry.text_time, entry.working_size) {
            let mtime = DateTime::<Utc>::from(meta.modified()?);
            if mtime == recorded && size == meta.len() {
                return Ok(false);
            }
        }
    }

    let (parent, _) = split_path(&path)?;
    let adm_paths = AdmPaths::new(set.config(), &parent);
    let working = std::fs::read(&path)?;
    if !force && working.len() as u64 != pristine_len(&adm_paths, checksum)? {
        return Ok(true);
    }
    let base = pristine::read_verified(&adm_paths, checksum, &path)?;
    let modified = base != working;
    debug!(path = %path.display(), modified, "compared against text base");
    Ok(modified)
}

fn pristine_len(adm_paths: &AdmPaths, checksum: &str) -> Result<u64, WcError> {
    Ok(std::fs::metadata(adm_paths.pristine(checksum))?.len())
}

/// Whether the working properties of `path` differ from the base ones.
pub fn props_modified(set: &LockSet, path: &Path) -> Result<bool, WcError> {
    Ok(entries::node_props(set, path)?.is_modified())
}

/// Whether `path` or anything below it, to `depth`, carries local changes.
///
/// Counts text and property edits and any pending schedule. Subdirectories
/// need not be locked; their tables are read from disk when absent from the
/// set.
pub fn tree_modified(set: &LockSet, path: &Path, depth: Depth) -> Result<bool, WcError> {
    let path = normalize(path);
    let kind = match entries::entry(set, &path, false) {
        Ok(Some(e)) => e.kind,
        Ok(None) => return Ok(false),
        Err(WcError::NotLocked(_)) if path.is_dir() => NodeKind::Dir,
        Err(e) => return Err(e),
    };
    if kind != NodeKind::Dir {
        return Ok(text_modified(set, &path, false)? || props_modified(set, &path)?);
    }
    dir_modified(set, &path, depth)
}

fn dir_modified(set: &LockSet, dir: &Path, depth: Depth) -> Result<bool, WcError> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let file = entries::dir_entries(set, dir)?;
    let adm_paths = AdmPaths::new(set.config(), dir);
    let table = crate::adm::props::read_props(&adm_paths)?;
    if table.get(THIS_DIR).is_some_and(|p| p.is_modified()) {
        return Ok(true);
    }

    for entry in file.entries.values().filter(|e| !e.name.is_empty() && !e.is_hidden()) {
        if entry.schedule != Schedule::Normal {
            return Ok(true);
        }
        let child = dir.join(&entry.name);
        match entry.kind {
            NodeKind::Dir if depth.includes_dirs() => {
                if dir_modified(set, &child, depth.descend())? {
                    return Ok(true);
                }
            }
            NodeKind::File if depth.includes_files() => {
                if table.get(&entry.name).is_some_and(|p| p.is_modified()) {
                    return Ok(true);
                }
                if file_modified_unlocked(set, dir, entry)? {
                    return Ok(true);
                }
            }
            _ => {}
        }
    }
    Ok(false)
}

/// Text check of a file whose parent may not be in the set.
fn file_modified_unlocked(
    set: &LockSet,
    dir: &Path,
    entry: &entries::Entry,
) -> Result<bool, WcError> {
    let path = dir.join(&entry.name);
    if set.retrieve(dir).is_ok() {
        return text_modified(set, &path, false);
    }
    let working = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let Some(checksum) = entry.checksum.as_deref() else {
        return Ok(true);
    };
    let base = pristine::read_verified(&AdmPaths::new(set.config(), dir), checksum, &path)?;
    Ok(base != working)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::lock::{LockDepth, LockMode};
    use crate::testutil::{checkout, Node};

    fn open(wc: &crate::testutil::TestWc, depth: LockDepth) -> LockSet {
        let cancel = CancellationToken::new();
        LockSet::open(&wc.config, &wc.root, LockMode::Read, depth, &cancel)
            .unwrap()
            .0
    }

    #[test]
    fn test_unmodified_file() {
        let wc = checkout(&[Node::file("a.txt", "alpha\n")]);
        let set = open(&wc, LockDepth::INFINITE);
        let path = wc.root.join("a.txt");
        assert!(!text_modified(&set, &path, false).unwrap());
        assert!(!text_modified(&set, &path, true).unwrap());
    }

    #[test]
    fn test_modified_file() {
        let wc = checkout(&[Node::file("a.txt", "alpha\n")]);
        let set = open(&wc, LockDepth::INFINITE);
        let path = wc.root.join("a.txt");
        std::fs::write(&path, "alpha beta\n").unwrap();
        assert!(text_modified(&set, &path, false).unwrap());
    }

    #[test]
    fn test_missing_file_is_unmodified() {
        let wc = checkout(&[Node::file("a.txt", "alpha\n")]);
        let set = open(&wc, LockDepth::INFINITE);
        let path = wc.root.join("a.txt");
        std::fs::remove_file(&path).unwrap();
        assert!(!text_modified(&set, &path, true).unwrap());
    }

    #[test]
    fn test_forced_compare_detects_corrupt_base() {
        let wc = checkout(&[Node::file("a.txt", "alpha\n")]);
        let set = open(&wc, LockDepth::INFINITE);
        let path = wc.root.join("a.txt");
        let sum = pristine::checksum(b"alpha\n");
        std::fs::write(AdmPaths::new(&wc.config, &wc.root).pristine(&sum), "other!\n").unwrap();
        let err = text_modified(&set, &path, true).unwrap_err();
        assert!(matches!(err, WcError::CorruptTextBase { .. }));
    }

    #[test]
    fn test_tree_modified_sees_nested_edit() {
        let wc = checkout(&[
            Node::dir("d"),
            Node::file("d/a.txt", "a\n"),
            Node::dir("d/e"),
            Node::file("d/e/b.txt", "b\n"),
        ]);
        let set = open(&wc, LockDepth::INFINITE);
        let d = wc.root.join("d");
        assert!(!tree_modified(&set, &d, Depth::Infinity).unwrap());

        std::fs::write(d.join("e").join("b.txt"), "b edited\n").unwrap();
        assert!(tree_modified(&set, &d, Depth::Infinity).unwrap());
        // Not visible when only the directory's files are considered.
        assert!(!tree_modified(&set, &d, Depth::Files).unwrap());
    }

    #[test]
    fn test_tree_modified_without_lock_on_subdirs() {
        let wc = checkout(&[Node::dir("d"), Node::file("d/a.txt", "a\n")]);
        let set = open(&wc, LockDepth::THIS_DIR);
        std::fs::write(wc.root.join("d").join("a.txt"), "a edited\n").unwrap();
        assert!(tree_modified(&set, &wc.root.join("d"), Depth::Infinity).unwrap());
    }
}
