use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::adm;
use crate::cancel::CancellationToken;
use crate::entries;
use crate::errors::WcError;
use crate::lock::{HandleId, LockSet};
use crate::models::{split_path, NodeKind, THIS_DIR};
use crate::status::text_modified;

/// Take `name` (or with [`THIS_DIR`] the directory `dir` itself) out of
/// version control.
///
/// With `destroy_wf` the working files are deleted too, except locally
/// modified ones, which are left in place and reported through
/// [`WcError::LeftLocalMod`]: immediately when `instant_error`, otherwise
/// once everything else has been removed. Every directory involved must be
/// write-locked in `set`; a purged directory's handle is closed.
pub fn remove_from_revision_control(
    set: &mut LockSet,
    dir: HandleId,
    name: &str,
    destroy_wf: bool,
    instant_error: bool,
    cancel: &CancellationToken,
) -> Result<(), WcError> {
    let mut left = Vec::new();
    let mut purge = Purge {
        destroy_wf,
        instant_error,
        cancel,
        left: &mut left,
    };
    purge.remove(set, dir, name)?;
    if left.is_empty() {
        Ok(())
    } else {
        warn!(count = left.len(), "locally modified files left in place");
        Err(WcError::LeftLocalMod { paths: left })
    }
}

struct Purge<'a> {
    destroy_wf: bool,
    instant_error: bool,
    cancel: &'a CancellationToken,
    left: &'a mut Vec<PathBuf>,
}

impl Purge<'_> {
    fn remove(&mut self, set: &mut LockSet, dir: HandleId, name: &str) -> Result<(), WcError> {
        self.cancel.check()?;
        set.require_write(dir)?;
        if name == THIS_DIR {
            return self.remove_dir(set, dir);
        }
        let path = set.path(dir).join(name);
        let entry = entries::entry_in(set, dir, name, true)?
            .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
        if entry.kind == NodeKind::Dir {
            return match set.retrieve(&path) {
                Ok(child) => self.remove_dir(set, child),
                Err(_) => {
                    // Missing or hidden: only the stub is left to drop.
                    entries::remove_entry(set, dir, name)?;
                    Ok(())
                }
            };
        }
        self.remove_file(set, dir, name)
    }

    fn remove_file(&mut self, set: &mut LockSet, dir: HandleId, name: &str) -> Result<(), WcError> {
        let path = set.path(dir).join(name);
        let modified = self.destroy_wf && path.exists() && text_modified(set, &path, false)?;
        entries::remove_entry(set, dir, name)?;
        if !self.destroy_wf {
            return Ok(());
        }
        if modified {
            return self.leave(path);
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(path = %path.display(), "removed working file");
        Ok(())
    }

    fn remove_dir(&mut self, set: &mut LockSet, dir: HandleId) -> Result<(), WcError> {
        set.require_write(dir)?;
        let path = set.path(dir).to_path_buf();
        let children: Vec<String> = entries::entries_read(set, dir, true)?
            .into_keys()
            .filter(|n| n != THIS_DIR)
            .collect();
        for name in children {
            self.remove(set, dir, &name)?;
        }

        adm::destroy_adm(set.config(), &path)?;
        set.forget(dir);
        if let Ok((parent, name)) = split_path(&path) {
            if let Ok(parent_id) = set.retrieve(&parent) {
                if set.is_locked(parent_id) {
                    entries::remove_entry(set, parent_id, &name)?;
                }
            }
        }
        if self.destroy_wf {
            // Fails harmlessly when unversioned or modified files remain.
            if let Err(e) = std::fs::remove_dir(&path) {
                debug!(path = %path.display(), error = %e, "directory left on disk");
            }
        }
        info!(path = %path.display(), "directory removed from version control");
        Ok(())
    }

    fn leave(&mut self, path: PathBuf) -> Result<(), WcError> {
        if self.instant_error {
            return Err(WcError::LeftLocalMod { paths: vec![path] });
        }
        self.left.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::lock::{LockDepth, LockMode};
    use crate::testutil::{checkout, Node};

    fn is_unversioned(set: &LockSet, path: &Path) -> bool {
        matches!(entries::entry(set, path, true), Ok(None) | Err(_))
    }

    fn tree() -> crate::testutil::TestWc {
        checkout(&[
            Node::file("a.txt", "a\n"),
            Node::dir("d"),
            Node::file("d/clean.txt", "clean\n"),
            Node::file("d/dirty.txt", "dirty\n"),
            Node::dir("d/e"),
            Node::file("d/e/deep.txt", "deep\n"),
        ])
    }

    #[test]
    fn test_remove_file_keeps_working_file() {
        let wc = tree();
        let cancel = CancellationToken::new();
        let (mut set, root) =
            LockSet::open(&wc.config, &wc.root, LockMode::Write, LockDepth::INFINITE, &cancel).unwrap();

        remove_from_revision_control(&mut set, root, "a.txt", false, false, &cancel).unwrap();
        assert!(wc.root.join("a.txt").exists());
        assert!(is_unversioned(&set, &wc.root.join("a.txt")));
    }

    #[test]
    fn test_remove_dir_aggregates_local_mods() {
        let wc = tree();
        let cancel = CancellationToken::new();
        let (mut set, root) =
            LockSet::open(&wc.config, &wc.root, LockMode::Write, LockDepth::INFINITE, &cancel).unwrap();
        std::fs::write(wc.root.join("d/dirty.txt"), "locally changed\n").unwrap();
        std::fs::write(wc.root.join("d/e/deep.txt"), "changed too\n").unwrap();

        let err = remove_from_revision_control(&mut set, root, "d", true, false, &cancel).unwrap_err();
        match err {
            WcError::LeftLocalMod { paths } => assert_eq!(paths.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!wc.root.join("d/clean.txt").exists());
        assert!(wc.root.join("d/dirty.txt").exists());
        assert!(wc.root.join("d/e/deep.txt").exists());
        assert!(!wc.root.join("d").join(".svn").exists());
        assert!(!wc.root.join("d/e").join(".svn").exists());
        assert!(entries::entry_in(&set, root, "d", true).unwrap().is_none());
        assert!(set.retrieve(&wc.root.join("d")).is_err());
    }

    #[test]
    fn test_remove_dir_instant_error_stops_at_first() {
        let wc = tree();
        let cancel = CancellationToken::new();
        let (mut set, root) =
            LockSet::open(&wc.config, &wc.root, LockMode::Write, LockDepth::INFINITE, &cancel).unwrap();
        std::fs::write(wc.root.join("d/dirty.txt"), "locally changed\n").unwrap();

        let err = remove_from_revision_control(&mut set, root, "d", true, true, &cancel).unwrap_err();
        match err {
            WcError::LeftLocalMod { paths } => {
                assert_eq!(paths, vec![wc.root.join("d").join("dirty.txt")])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_remove_this_dir_unmodified_tree() {
        let wc = tree();
        let cancel = CancellationToken::new();
        let (mut set, _) =
            LockSet::open(&wc.config, &wc.root, LockMode::Write, LockDepth::INFINITE, &cancel).unwrap();
        let e = set.retrieve(&wc.root.join("d").join("e")).unwrap();
        remove_from_revision_control(&mut set, e, THIS_DIR, true, false, &cancel).unwrap();
        assert!(!wc.root.join("d/e").exists());
        let d = set.retrieve(&wc.root.join("d")).unwrap();
        assert!(entries::entry_in(&set, d, "e", true).unwrap().is_none());
    }
}
