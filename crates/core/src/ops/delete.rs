use std::path::Path;

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::entries::{self, Schedule};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, split_path, NodeKind, THIS_DIR};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction};
use crate::status::{props_modified, text_modified};

use super::remove::remove_from_revision_control;

/// Schedule `path` for deletion.
///
/// Directories are scheduled recursively and stay on disk until the
/// deletion is committed. Unmodified files are removed from disk unless
/// `keep_local`. A node that was only scheduled for addition is taken out of
/// version control instead, leaving its files in place.
pub fn delete(
    set: &mut LockSet,
    path: &Path,
    keep_local: bool,
    cancel: &CancellationToken,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    cancel.check()?;
    let path = normalize(path);
    let entry = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    let (parent, _) = split_path(&path)?;
    let parent_id = set.retrieve(&parent)?;
    set.require_write(parent_id)?;

    if entry.schedule == Schedule::Add {
        unversion(set, &path, entry.kind, cancel)?;
        info!(path = %path.display(), "added node reverted to unversioned");
        emit(notify, Notification::new(&path, NotifyAction::Delete).with_kind(entry.kind));
        return Ok(());
    }
    schedule_delete(set, &path, entry.kind, keep_local, cancel, notify)?;
    info!(path = %path.display(), keep_local, "scheduled for deletion");
    Ok(())
}

/// Drop an added node's versioning without touching its working files.
pub(super) fn unversion(
    set: &mut LockSet,
    path: &Path,
    kind: NodeKind,
    cancel: &CancellationToken,
) -> Result<(), WcError> {
    let (parent, name) = split_path(path)?;
    let parent_id = set.retrieve(&parent)?;
    if kind == NodeKind::Dir {
        if let Ok(id) = set.retrieve(path) {
            return remove_from_revision_control(set, id, THIS_DIR, false, false, cancel);
        }
    }
    remove_from_revision_control(set, parent_id, &name, false, false, cancel)
}

fn schedule_delete(
    set: &mut LockSet,
    path: &Path,
    kind: NodeKind,
    keep_local: bool,
    cancel: &CancellationToken,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    cancel.check()?;
    if kind == NodeKind::Dir {
        if let Ok(id) = set.retrieve(path) {
            set.require_write(id)?;
            let children = entries::entries_read(set, id, false)?;
            for (name, child) in children.into_iter().filter(|(n, _)| n != THIS_DIR) {
                let child_path = path.join(&name);
                if child.schedule == Schedule::Add {
                    unversion(set, &child_path, child.kind, cancel)?;
                    emit(notify, Notification::new(&child_path, NotifyAction::Delete).with_kind(child.kind));
                } else {
                    schedule_delete(set, &child_path, child.kind, keep_local, cancel, notify)?;
                }
            }
        }
        entries::modify_entry(set, path, |e| {
            e.schedule = Schedule::Delete;
            if e.name == THIS_DIR {
                e.keep_local = keep_local;
            }
        })?;
    } else {
        let modified = path.exists() && (text_modified(set, path, false)? || props_modified(set, path)?);
        entries::modify_entry(set, path, |e| e.schedule = Schedule::Delete)?;
        if !keep_local && !modified {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed working file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    emit(notify, Notification::new(path, NotifyAction::Delete).with_kind(kind));
    Ok(())
}

/// Record the missing node `path` as deleted in the repository.
///
/// Used after a committed deletion whose working node is already gone: the
/// entry becomes a hidden placeholder at its current revision.
pub fn mark_missing_deleted(set: &mut LockSet, path: &Path) -> Result<(), WcError> {
    let path = normalize(path);
    if NodeKind::on_disk(&path)? != NodeKind::None {
        return Err(WcError::InvalidOperation {
            path,
            detail: "not missing from disk".into(),
        });
    }
    entries::entry(set, &path, true)?.ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    entries::modify_entry(set, &path, |e| {
        e.deleted = true;
        e.schedule = Schedule::Normal;
    })?;
    debug!(path = %path.display(), "missing node marked deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockDepth, LockMode};
    use crate::notify::NotificationLog;
    use crate::ops::add;
    use crate::status::{status, StatusKind};
    use crate::testutil::{checkout, Node};

    fn open(wc: &crate::testutil::TestWc) -> LockSet {
        let cancel = CancellationToken::new();
        LockSet::open(&wc.config, &wc.root, LockMode::Write, LockDepth::INFINITE, &cancel)
            .unwrap()
            .0
    }

    #[test]
    fn test_delete_file_removes_unmodified_text() {
        let wc = checkout(&[Node::file("a.txt", "a\n"), Node::file("b.txt", "b\n")]);
        let mut set = open(&wc);
        let cancel = CancellationToken::new();
        let log = NotificationLog::new();
        std::fs::write(wc.root.join("b.txt"), "b plus edits\n").unwrap();

        delete(&mut set, &wc.root.join("a.txt"), false, &cancel, &log).unwrap();
        delete(&mut set, &wc.root.join("b.txt"), false, &cancel, &log).unwrap();
        assert!(!wc.root.join("a.txt").exists());
        assert!(wc.root.join("b.txt").exists());
        assert_eq!(status(&set, &wc.root.join("a.txt")).unwrap().text_status, StatusKind::Deleted);
        assert_eq!(log.count(NotifyAction::Delete), 2);
    }

    #[test]
    fn test_delete_keep_local() {
        let wc = checkout(&[Node::file("a.txt", "a\n")]);
        let mut set = open(&wc);
        delete(
            &mut set,
            &wc.root.join("a.txt"),
            true,
            &CancellationToken::new(),
            &NotificationLog::new(),
        )
        .unwrap();
        assert!(wc.root.join("a.txt").exists());
        let e = entries::entry(&set, &wc.root.join("a.txt"), false).unwrap().unwrap();
        assert_eq!(e.schedule, Schedule::Delete);
    }

    #[test]
    fn test_delete_dir_is_recursive() {
        let wc = checkout(&[Node::dir("d"), Node::file("d/f.txt", "f\n"), Node::dir("d/e")]);
        let mut set = open(&wc);
        let log = NotificationLog::new();
        delete(&mut set, &wc.root.join("d"), false, &CancellationToken::new(), &log).unwrap();

        assert!(wc.root.join("d").is_dir());
        for p in ["d", "d/f.txt", "d/e"] {
            let e = entries::entry(&set, &wc.root.join(p), false).unwrap().unwrap();
            assert_eq!(e.schedule, Schedule::Delete, "{p}");
        }
        let root = set.root().unwrap();
        let stub = entries::entry_in(&set, root, "d", false).unwrap().unwrap();
        assert_eq!(stub.schedule, Schedule::Delete);
        assert_eq!(log.count(NotifyAction::Delete), 3);
    }

    #[test]
    fn test_delete_added_file_unversions() {
        let wc = checkout(&[]);
        let mut set = open(&wc);
        let cancel = CancellationToken::new();
        let log = NotificationLog::new();
        std::fs::write(wc.root.join("new.txt"), "n").unwrap();
        add(&mut set, &wc.root.join("new.txt"), None, &cancel, &log).unwrap();

        delete(&mut set, &wc.root.join("new.txt"), false, &cancel, &log).unwrap();
        assert!(wc.root.join("new.txt").exists());
        assert!(entries::entry(&set, &wc.root.join("new.txt"), true).unwrap().is_none());
    }

    #[test]
    fn test_mark_missing_deleted() {
        let wc = checkout(&[Node::file("a.txt", "a\n")]);
        let mut set = open(&wc);
        let path = wc.root.join("a.txt");
        assert!(matches!(
            mark_missing_deleted(&mut set, &path),
            Err(WcError::InvalidOperation { .. })
        ));

        std::fs::remove_file(&path).unwrap();
        mark_missing_deleted(&mut set, &path).unwrap();
        assert!(entries::entry(&set, &path, false).unwrap().is_none());
        let hidden = entries::entry(&set, &path, true).unwrap().unwrap();
        assert!(hidden.deleted);
    }
}
