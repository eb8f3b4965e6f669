use std::path::Path;

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::conflict::{resolved_tree_conflict, tree_conflict};
use crate::entries::{self, Entry, Schedule};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, split_path, Depth, NodeKind, THIS_DIR};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction, NullSink};
use crate::status::text_modified;

use super::delete::unversion;
use super::resolve::clear_conflict_files;
use super::restore_text;

/// Undo local changes to `path`, descending to `depth`.
///
/// Text is restored from the pristine, base properties replace working
/// ones, pending schedules are dropped (an added node becomes unversioned)
/// and conflict markers of every kind are cleared. Nodes that had nothing to
/// revert are not notified.
pub fn revert(
    set: &mut LockSet,
    path: &Path,
    depth: Depth,
    cancel: &CancellationToken,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    let path = normalize(path);
    let Some(entry) = entries::entry(set, &path, false)? else {
        // An unversioned tree-conflict victim only carries its record.
        if clear_tree_conflict(set, &path)? {
            emit(notify, Notification::new(&path, NotifyAction::Revert));
            return Ok(());
        }
        return Err(WcError::EntryNotFound(path));
    };
    revert_tree(set, &path, entry, depth, cancel, notify)
}

fn revert_tree(
    set: &mut LockSet,
    path: &Path,
    entry: Entry,
    depth: Depth,
    cancel: &CancellationToken,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    cancel.check()?;
    let was_added = entry.schedule == Schedule::Add;
    if revert_node(set, path, &entry, cancel)? {
        info!(path = %path.display(), "reverted");
        emit(notify, Notification::new(path, NotifyAction::Revert).with_kind(entry.kind));
    }
    if was_added || entry.kind != NodeKind::Dir {
        return Ok(());
    }

    let Ok(id) = set.retrieve(path) else {
        return Ok(());
    };
    for (name, child) in entries::entries_read(set, id, false)? {
        if name == THIS_DIR {
            continue;
        }
        let is_dir = child.kind == NodeKind::Dir;
        if (is_dir && !depth.includes_dirs()) || (!is_dir && !depth.includes_files()) {
            continue;
        }
        let child_path = path.join(&name);
        let child = if is_dir {
            entries::entry(set, &child_path, false)?.unwrap_or(child)
        } else {
            child
        };
        revert_tree(set, &child_path, child, depth.descend(), cancel, notify)?;
    }
    Ok(())
}

/// Revert one node; returns whether anything changed.
fn revert_node(
    set: &mut LockSet,
    path: &Path,
    entry: &Entry,
    cancel: &CancellationToken,
) -> Result<bool, WcError> {
    if entry.schedule == Schedule::Add {
        clear_conflict_files(set, path, entry, true, true)?;
        clear_tree_conflict(set, path)?;
        unversion(set, path, entry.kind, cancel)?;
        return Ok(true);
    }

    let mut reverted = false;
    if matches!(entry.schedule, Schedule::Delete | Schedule::Replace) {
        entries::modify_entry(set, path, |e| {
            e.schedule = Schedule::Normal;
            e.copied = false;
            e.copyfrom_url = None;
            e.copyfrom_rev = None;
            e.keep_local = false;
        })?;
        reverted = true;
    }

    if entry.kind == NodeKind::File {
        if let Some(sum) = entry.checksum.as_deref() {
            let restore = !path.exists() || reverted || text_modified(set, path, false)?;
            if restore {
                restore_text(set, path, sum, entry.cmt_date)?;
                debug!(path = %path.display(), "working text restored from pristine");
                reverted = true;
            }
        }
    }

    let mut node = entries::node_props(set, path)?;
    if node.is_modified() {
        node.working = node.base.clone();
        entries::write_node_props(set, path, node)?;
        reverted = true;
    }

    if clear_conflict_files(set, path, entry, true, true)? {
        reverted = true;
    }
    if clear_tree_conflict(set, path)? {
        reverted = true;
    }
    Ok(reverted)
}

fn clear_tree_conflict(set: &mut LockSet, path: &Path) -> Result<bool, WcError> {
    if tree_conflict(set, path)?.is_none() {
        return Ok(false);
    }
    resolved_tree_conflict(set, path, &NullSink)
}

/// Re-create the missing working file `path` from its pristine.
///
/// Returns `false` when there was nothing to restore: the file exists, is
/// scheduled for deletion, or has no text base.
pub fn restore(set: &mut LockSet, path: &Path, notify: &dyn NotificationSink) -> Result<bool, WcError> {
    let path = normalize(path);
    let entry = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    if entry.kind != NodeKind::File || entry.schedule == Schedule::Delete || path.exists() {
        return Ok(false);
    }
    let Some(sum) = entry.checksum.as_deref() else {
        return Ok(false);
    };
    let (parent, _) = split_path(&path)?;
    set.require_write(set.retrieve(&parent)?)?;
    restore_text(set, &path, sum, entry.cmt_date)?;
    info!(path = %path.display(), "restored missing file");
    emit(notify, Notification::new(&path, NotifyAction::Restore).with_kind(NodeKind::File));
    Ok(true)
}
