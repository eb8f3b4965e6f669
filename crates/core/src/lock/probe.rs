//! Path-shape aware variants of open/retrieve.
//!
//! A path may be a versioned directory (use it), a file or missing path (use
//! its parent), or an unversioned directory (use its parent, but report
//! failures against the path itself).

use std::path::Path;

use tracing::debug;

use super::{HandleId, LockDepth, LockMode, LockSet};
use crate::adm;
use crate::cancel::CancellationToken;
use crate::config::WcConfig;
use crate::errors::WcError;
use crate::models::{join_url, normalize, split_path, NodeKind, THIS_DIR};

/// Result of [`LockSet::open_anchor`].
#[derive(Debug)]
pub struct Anchor {
    pub set: LockSet,
    /// Directory the operation is anchored at.
    pub anchor: HandleId,
    /// Handle of the target directory, or the anchor when the target is a
    /// file or missing.
    pub target: HandleId,
    /// Name of the target inside the anchor, empty when both coincide.
    pub target_name: String,
}

impl LockSet {
    /// Open the directory that governs `path` as the root of a new set.
    pub fn probe_open(
        config: &WcConfig,
        path: &Path,
        mode: LockMode,
        depth: LockDepth,
        cancel: &CancellationToken,
    ) -> Result<(LockSet, HandleId), WcError> {
        let mut set = LockSet::new(config);
        let id = set.probe_open_in(path, mode, depth, cancel)?;
        Ok((set, id))
    }

    /// Open the directory that governs `path` into this set.
    pub fn probe_open_in(
        &mut self,
        path: &Path,
        mode: LockMode,
        depth: LockDepth,
        cancel: &CancellationToken,
    ) -> Result<HandleId, WcError> {
        let path = normalize(path);
        let kind = NodeKind::on_disk(&path)?;
        let versioned_dir = kind == NodeKind::Dir && adm::check_wc(&self.config, &path)?.is_some();

        if versioned_dir {
            return self.open_in(&path, mode, depth, cancel);
        }

        let (parent, _) = split_path(&path)?;
        debug!(path = %path.display(), parent = %parent.display(), "probing parent directory");
        // Only the parent itself: siblings of a file are not part of the request.
        self.open_in(&parent, mode, LockDepth::THIS_DIR, cancel)
            .map_err(|e| match e {
                WcError::NotDirectory(_) if kind == NodeKind::Dir => WcError::NotDirectory(path),
                other => other,
            })
    }

    /// Retrieve the handle governing `path` without touching the disk.
    pub fn probe_retrieve(&self, path: &Path) -> Result<HandleId, WcError> {
        match self.retrieve(path) {
            Ok(id) => Ok(id),
            Err(WcError::NotLocked(_)) => {
                let (parent, _) = split_path(path)?;
                self.retrieve(&parent)
                    .map_err(|_| WcError::NotLocked(normalize(path)))
            }
            Err(e) => Err(e),
        }
    }

    /// Retrieve the governing handle, opening it into this set if needed.
    pub fn probe_try(
        &mut self,
        path: &Path,
        mode: LockMode,
        depth: LockDepth,
        cancel: &CancellationToken,
    ) -> Result<HandleId, WcError> {
        match self.probe_retrieve(path) {
            Ok(id) => Ok(id),
            Err(WcError::NotLocked(_)) => self.probe_open_in(path, mode, depth, cancel),
            Err(e) => Err(e),
        }
    }

    /// Split `path` into an anchor directory and a target inside it.
    ///
    /// A working-copy root, or a directory switched away from its parent, is
    /// its own anchor. Otherwise the parent is locked (this level only) and
    /// the target, if it is a versioned directory, is locked to `depth`.
    pub fn open_anchor(
        config: &WcConfig,
        path: &Path,
        mode: LockMode,
        depth: LockDepth,
        cancel: &CancellationToken,
    ) -> Result<Anchor, WcError> {
        let path = normalize(path);
        let (parent, name) = split_path(&path)?;

        if is_own_anchor(config, &parent, &name, &path)? {
            let (set, id) = LockSet::open(config, &path, mode, depth, cancel)?;
            return Ok(Anchor {
                set,
                anchor: id,
                target: id,
                target_name: String::new(),
            });
        }

        let mut set = LockSet::new(config);
        let anchor = set.open_in(&parent, mode, LockDepth::THIS_DIR, cancel)?;
        let target_is_dir = path.is_dir() && adm::check_wc(config, &path)?.is_some();
        let target = if target_is_dir {
            set.open_in(&path, mode, depth, cancel)?
        } else {
            anchor
        };
        Ok(Anchor {
            set,
            anchor,
            target,
            target_name: name,
        })
    }
}

fn is_own_anchor(
    config: &WcConfig,
    parent: &Path,
    name: &str,
    path: &Path,
) -> Result<bool, WcError> {
    if adm::check_wc(config, parent)?.is_none() {
        return Ok(true);
    }
    let parent_file = adm::store::read_entries_file(&adm::AdmPaths::new(config, parent))?;
    let Some(stub) = parent_file.entries.get(name) else {
        // Versioned directories unknown to the parent are roots of their own.
        return Ok(adm::check_wc(config, path)?.is_some());
    };
    if stub.kind != NodeKind::Dir || adm::check_wc(config, path)?.is_none() {
        return Ok(false);
    }

    // Switched: the target's URL is not the parent's URL plus its name.
    let own = adm::store::read_entries_file(&adm::AdmPaths::new(config, path))?;
    let parent_url = parent_file
        .entries
        .get(THIS_DIR)
        .and_then(|e| e.url.clone());
    let own_url = own
        .entries
        .get(THIS_DIR)
        .and_then(|e| e.url.clone());
    Ok(match (parent_url, own_url) {
        (Some(p), Some(o)) => join_url(&p, name) != o,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adm::{store, AdmPaths};
    use crate::testutil::{checkout, Node};

    #[test]
    fn test_probe_file_opens_parent_only() {
        let wc = checkout(&[Node::file("a.txt", "a\n"), Node::dir("d")]);
        let cancel = CancellationToken::new();
        let (set, id) = LockSet::probe_open(
            &wc.config,
            &wc.root.join("a.txt"),
            LockMode::Write,
            LockDepth::INFINITE,
            &cancel,
        )
        .unwrap();
        assert_eq!(set.path(id), wc.root.as_path());
        assert_eq!(set.handles().count(), 1);
        assert_eq!(set.probe_retrieve(&wc.root.join("a.txt")).unwrap(), id);
        assert!(set.probe_retrieve(&wc.root.join("d").join("x")).is_err());
    }

    #[test]
    fn test_probe_try_reuses_open_handle() {
        let wc = checkout(&[Node::dir("d")]);
        let cancel = CancellationToken::new();
        let (mut set, root) =
            LockSet::open(&wc.config, &wc.root, LockMode::Write, LockDepth::INFINITE, &cancel).unwrap();
        let again = set
            .probe_try(&wc.root.join("missing.txt"), LockMode::Write, LockDepth::THIS_DIR, &cancel)
            .unwrap();
        assert_eq!(again, root);
    }

    #[test]
    fn test_unversioned_dir_reported_against_itself() {
        let tmp = tempfile::tempdir().unwrap();
        let plain = tmp.path().join("plain");
        std::fs::create_dir_all(plain.join("inner")).unwrap();
        let cancel = CancellationToken::new();
        let err = LockSet::probe_open(
            &WcConfig::default(),
            &plain.join("inner"),
            LockMode::Read,
            LockDepth::THIS_DIR,
            &cancel,
        )
        .unwrap_err();
        match err {
            WcError::NotDirectory(p) => assert_eq!(p, plain.join("inner")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_anchor_of_file_is_parent() {
        let wc = checkout(&[Node::dir("d"), Node::file("d/f.txt", "f\n")]);
        let cancel = CancellationToken::new();
        let anchor = LockSet::open_anchor(
            &wc.config,
            &wc.root.join("d").join("f.txt"),
            LockMode::Write,
            LockDepth::INFINITE,
            &cancel,
        )
        .unwrap();
        assert_eq!(anchor.anchor, anchor.target);
        assert_eq!(anchor.target_name, "f.txt");
        assert_eq!(anchor.set.path(anchor.anchor), wc.root.join("d").as_path());
    }

    #[test]
    fn test_switched_dir_is_its_own_anchor() {
        let wc = checkout(&[Node::dir("d")]);
        let cancel = CancellationToken::new();

        let plain = LockSet::open_anchor(&wc.config, &wc.root.join("d"), LockMode::Read, LockDepth::INFINITE, &cancel)
            .unwrap();
        assert_ne!(plain.anchor, plain.target);
        assert_eq!(plain.target_name, "d");
        drop(plain);

        let adm_paths = AdmPaths::new(&wc.config, &wc.root.join("d"));
        let mut file = store::read_entries_file(&adm_paths).unwrap();
        if let Some(e) = file.entries.get_mut(THIS_DIR) {
            e.url = Some("http://svn.example.com/repo/branches/x/d".into());
        }
        store::write_entries_file(&adm_paths, &file).unwrap();

        let switched = LockSet::open_anchor(&wc.config, &wc.root.join("d"), LockMode::Read, LockDepth::INFINITE, &cancel)
            .unwrap();
        assert_eq!(switched.anchor, switched.target);
        assert!(switched.target_name.is_empty());
    }
}
