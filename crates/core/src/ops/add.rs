use std::path::Path;

use tracing::info;

use crate::adm::{self, AdmInit};
use crate::cancel::CancellationToken;
use crate::entries::{self, Entry, Schedule};
use crate::errors::WcError;
use crate::lock::{LockDepth, LockMode, LockSet};
use crate::models::{join_url, normalize, split_path, Depth, NodeKind, Revnum, THIS_DIR};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction};

/// Put `path` under version control, scheduled for addition.
///
/// A node whose entry is scheduled for deletion is scheduled for
/// replacement instead. A directory gets a fresh administrative area and is
/// opened for writing into `set`. With `copyfrom` the node is recorded as a
/// copy of that URL at that revision.
pub fn add(
    set: &mut LockSet,
    path: &Path,
    copyfrom: Option<(&str, Revnum)>,
    cancel: &CancellationToken,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    cancel.check()?;
    let path = normalize(path);
    let kind = match NodeKind::on_disk(&path)? {
        NodeKind::None => return Err(WcError::PathNotFound(path)),
        NodeKind::Unknown => {
            return Err(WcError::InvalidOperation {
                path,
                detail: "unsupported node kind".into(),
            })
        }
        kind => kind,
    };

    let (parent, name) = split_path(&path)?;
    if set.config().is_adm_dir(&name) {
        return Err(WcError::InvalidOperation {
            path,
            detail: "reserved administrative name".into(),
        });
    }
    let parent_id = set.retrieve(&parent)?;
    set.require_write(parent_id)?;
    let parent_entry = entries::entry_in(set, parent_id, THIS_DIR, true)?
        .ok_or_else(|| WcError::EntryNotFound(parent.clone()))?;
    if parent_entry.schedule == Schedule::Delete {
        return Err(WcError::InvalidOperation {
            path,
            detail: "parent directory is scheduled for deletion".into(),
        });
    }

    let existing = entries::entry_in(set, parent_id, &name, true)?;
    let schedule = match &existing {
        Some(e) if e.kind != kind && (e.schedule == Schedule::Delete || e.is_hidden()) => {
            return Err(WcError::NodeKindChange(path));
        }
        Some(e) if e.schedule == Schedule::Delete => Schedule::Replace,
        Some(e) if !e.is_hidden() => {
            return Err(WcError::InvalidOperation {
                path,
                detail: "already under version control".into(),
            })
        }
        _ => Schedule::Add,
    };

    let url = parent_entry.url.as_deref().map(|u| join_url(u, &name));
    let mut entry = Entry::new(&name, kind);
    entry.schedule = schedule;
    entry.url = url.clone();
    entry.repos = parent_entry.repos.clone();
    entry.uuid = parent_entry.uuid.clone();
    entry.revision = Some(0);
    if let Some(old) = existing.as_ref().filter(|_| schedule == Schedule::Replace) {
        // The replaced node's text base stays available to revert.
        entry.revision = old.revision;
        entry.checksum = old.checksum.clone();
    }
    if let Some((from_url, from_rev)) = copyfrom {
        entry.copied = true;
        entry.copyfrom_url = Some(from_url.to_string());
        entry.copyfrom_rev = Some(from_rev);
        entry.revision = Some(from_rev);
    }

    if kind == NodeKind::Dir {
        let init = AdmInit {
            url: url.clone().unwrap_or_default(),
            repos: entry.repos.clone(),
            uuid: entry.uuid.clone(),
            revision: entry.revision.unwrap_or(0),
            depth: Depth::Infinity,
        };
        adm::ensure_adm(set.config(), &path, &init)?;
        entries::write_entry(set, parent_id, entry.stub(&name))?;
        if set.retrieve(&path).is_err() {
            set.open_in(&path, LockMode::Write, LockDepth::THIS_DIR, cancel)?;
        }
        let dir_entry = entry.clone();
        entries::modify_entry(set, &path, |e| {
            e.schedule = dir_entry.schedule;
            e.url = dir_entry.url.clone();
            e.deleted = false;
            e.incomplete = false;
            e.copied = dir_entry.copied;
            e.copyfrom_url = dir_entry.copyfrom_url.clone();
            e.copyfrom_rev = dir_entry.copyfrom_rev;
            if dir_entry.copyfrom_rev.is_some() {
                e.revision = dir_entry.revision;
            }
        })?;
    } else {
        entries::write_entry(set, parent_id, entry)?;
    }

    info!(path = %path.display(), schedule = %schedule, "scheduled for addition");
    emit(notify, Notification::new(&path, NotifyAction::Add).with_kind(kind));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationLog;
    use crate::status::{status, StatusKind};
    use crate::testutil::{checkout, Node};

    fn open(wc: &crate::testutil::TestWc) -> LockSet {
        let cancel = CancellationToken::new();
        LockSet::open(&wc.config, &wc.root, LockMode::Write, LockDepth::INFINITE, &cancel)
            .unwrap()
            .0
    }

    #[test]
    fn test_add_file_and_dir() {
        let wc = checkout(&[]);
        std::fs::write(wc.root.join("new.txt"), "n").unwrap();
        std::fs::create_dir(wc.root.join("newdir")).unwrap();
        let mut set = open(&wc);
        let log = NotificationLog::new();
        let cancel = CancellationToken::new();

        add(&mut set, &wc.root.join("new.txt"), None, &cancel, &log).unwrap();
        add(&mut set, &wc.root.join("newdir"), None, &cancel, &log).unwrap();
        assert_eq!(log.count(NotifyAction::Add), 2);

        let file = entries::entry(&set, &wc.root.join("new.txt"), false).unwrap().unwrap();
        assert_eq!(file.schedule, Schedule::Add);
        assert!(file.url.unwrap().ends_with("/trunk/new.txt"));

        let dir_id = set.retrieve(&wc.root.join("newdir")).unwrap();
        assert!(set.is_locked(dir_id));
        assert_eq!(
            status(&set, &wc.root.join("newdir")).unwrap().text_status,
            StatusKind::Added
        );
    }

    #[test]
    fn test_add_missing_path() {
        let wc = checkout(&[]);
        let mut set = open(&wc);
        let err = add(
            &mut set,
            &wc.root.join("ghost"),
            None,
            &CancellationToken::new(),
            &NotificationLog::new(),
        )
        .unwrap_err();
        assert!(matches!(err, WcError::PathNotFound(_)));
    }

    #[test]
    fn test_add_over_deleted_replaces_or_refuses_kind_change() {
        let wc = checkout(&[Node::file("a.txt", "a\n"), Node::file("b.txt", "b\n")]);
        let mut set = open(&wc);
        let cancel = CancellationToken::new();
        let log = NotificationLog::new();
        for name in ["a.txt", "b.txt"] {
            entries::modify_entry(&mut set, &wc.root.join(name), |e| e.schedule = Schedule::Delete)
                .unwrap();
        }

        add(&mut set, &wc.root.join("a.txt"), None, &cancel, &log).unwrap();
        let a = entries::entry(&set, &wc.root.join("a.txt"), false).unwrap().unwrap();
        assert_eq!(a.schedule, Schedule::Replace);
        assert_eq!(a.revision, Some(1));

        std::fs::remove_file(wc.root.join("b.txt")).unwrap();
        std::fs::create_dir(wc.root.join("b.txt")).unwrap();
        let err = add(&mut set, &wc.root.join("b.txt"), None, &cancel, &log).unwrap_err();
        assert!(matches!(err, WcError::NodeKindChange(_)));
    }

    #[test]
    fn test_add_versioned_path_is_refused() {
        let wc = checkout(&[Node::file("a.txt", "a\n")]);
        let mut set = open(&wc);
        let err = add(
            &mut set,
            &wc.root.join("a.txt"),
            None,
            &CancellationToken::new(),
            &NotificationLog::new(),
        )
        .unwrap_err();
        assert!(matches!(err, WcError::InvalidOperation { .. }));
    }
}
