use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::adm::pristine;
use crate::cancel::CancellationToken;
use crate::entries::{self, Entry, Schedule};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, split_path, NodeKind, Revnum, THIS_DIR};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction};

use super::remove::remove_from_revision_control;

/// What the repository reported for a successful commit.
#[derive(Debug, Clone, Default)]
pub struct CommitInfo {
    /// Also process everything below a committed directory.
    pub recurse: bool,
    pub new_revision: Revnum,
    pub date: Option<DateTime<Utc>>,
    pub author: Option<String>,
    /// Drop the repository lock recorded on committed files.
    pub remove_lock: bool,
    /// Drop the changelist of committed files.
    pub remove_changelist: bool,
    /// sha256 of the committed text, checked against the working file.
    pub checksum: Option<String>,
}

/// Bring `path` in line with a commit that produced `info.new_revision`.
///
/// Added, replaced and modified nodes become normal at the new revision,
/// with the working text installed as the new pristine. A committed
/// deletion removes the entry; a deleted directory leaves a hidden
/// placeholder in its parent.
pub fn process_committed(
    set: &mut LockSet,
    path: &Path,
    info: &CommitInfo,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    let path = normalize(path);
    let entry = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    process_node(set, &path, entry, info, true, notify)?;
    info!(path = %path.display(), revision = info.new_revision, "commit processed");
    Ok(())
}

fn process_node(
    set: &mut LockSet,
    path: &Path,
    entry: Entry,
    info: &CommitInfo,
    top: bool,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    if entry.schedule == Schedule::Delete {
        return commit_deletion(set, path, &entry, info, notify);
    }

    let mut changed = entry.schedule != Schedule::Normal;
    let mut new_checksum = entry.checksum.clone();
    if entry.kind == NodeKind::File && path.exists() {
        let (parent, _) = split_path(path)?;
        let parent_id = set.retrieve(&parent)?;
        let data = std::fs::read(path)?;
        let sum = pristine::checksum(&data);
        if let Some(expected) = info.checksum.as_deref().filter(|_| top) {
            if expected != sum {
                return Err(WcError::CorruptTextBase {
                    path: path.to_path_buf(),
                    expected: expected.to_string(),
                    actual: sum,
                });
            }
        }
        pristine::install(&set.adm(parent_id), &data)?;
        changed |= entry.checksum.as_deref() != Some(sum.as_str());
        new_checksum = Some(sum);
    }

    let mut props = entries::node_props(set, path)?;
    if props.is_modified() {
        props.base = props.working.clone();
        entries::write_node_props(set, path, props)?;
        changed = true;
    }

    entries::modify_entry(set, path, |e| {
        e.schedule = Schedule::Normal;
        e.revision = Some(info.new_revision);
        e.copied = false;
        e.copyfrom_url = None;
        e.copyfrom_rev = None;
        e.deleted = false;
        if e.kind == NodeKind::File || e.name == THIS_DIR {
            e.cmt_rev = Some(info.new_revision);
            e.cmt_date = info.date;
            e.cmt_author = info.author.clone();
        }
        if e.kind == NodeKind::File {
            e.checksum = new_checksum.clone();
            if info.remove_lock {
                e.lock = None;
            }
            if info.remove_changelist {
                e.changelist = None;
            }
        }
    })?;
    if entry.kind == NodeKind::File && path.exists() {
        entries::stamp(set, path)?;
    }

    if changed {
        let action = match entry.schedule {
            Schedule::Add => NotifyAction::CommitAdded,
            Schedule::Replace => NotifyAction::CommitReplaced,
            _ => NotifyAction::CommitModified,
        };
        emit(
            notify,
            Notification::new(path, action)
                .with_kind(entry.kind)
                .with_revision(Some(info.new_revision)),
        );
    }

    if entry.kind == NodeKind::Dir && info.recurse {
        let Ok(id) = set.retrieve(path) else {
            debug!(path = %path.display(), "directory not open, children skipped");
            return Ok(());
        };
        for (name, child) in entries::entries_read(set, id, false)? {
            if name == THIS_DIR {
                continue;
            }
            let child_path = path.join(&name);
            let child = if child.kind == NodeKind::Dir {
                match entries::entry(set, &child_path, false) {
                    Ok(Some(full)) if set.retrieve(&child_path).is_ok() => full,
                    _ => continue,
                }
            } else {
                child
            };
            process_node(set, &child_path, child, info, false, notify)?;
        }
    }
    Ok(())
}

fn commit_deletion(
    set: &mut LockSet,
    path: &Path,
    entry: &Entry,
    info: &CommitInfo,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    let (parent, name) = split_path(path)?;
    let parent_id = set.retrieve(&parent)?;
    if entry.kind == NodeKind::Dir {
        if let Ok(id) = set.retrieve(path) {
            let destroy = !entry.keep_local;
            match remove_from_revision_control(set, id, THIS_DIR, destroy, false, &CancellationToken::new()) {
                Ok(()) | Err(WcError::LeftLocalMod { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        let mut stub = Entry::new(&name, NodeKind::Dir);
        stub.deleted = true;
        stub.revision = Some(info.new_revision);
        entries::write_entry(set, parent_id, stub)?;
    } else {
        entries::remove_entry(set, parent_id, &name)?;
    }
    emit(
        notify,
        Notification::new(path, NotifyAction::CommitDeleted)
            .with_kind(entry.kind)
            .with_revision(Some(info.new_revision)),
    );
    Ok(())
}
