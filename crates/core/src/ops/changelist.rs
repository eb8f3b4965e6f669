use std::path::Path;

use tracing::debug;

use crate::entries;
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, NodeKind};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction};

/// Put the file `path` on `changelist`, or take it off with `None`.
///
/// Directories cannot belong to a changelist; they are reported with
/// `ChangelistFailed` and left alone. Moving a file between changelists
/// clears the old one first.
pub fn set_changelist(
    set: &mut LockSet,
    path: &Path,
    changelist: Option<&str>,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    let path = normalize(path);
    let entry = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    if entry.kind == NodeKind::Dir {
        emit(
            notify,
            Notification::failed(&path, NotifyAction::ChangelistFailed, &"directories cannot be on a changelist")
                .with_kind(NodeKind::Dir),
        );
        return Ok(());
    }
    if entry.changelist.as_deref() == changelist {
        return Ok(());
    }

    let new = changelist.map(str::to_string);
    entries::modify_entry(set, &path, |e| e.changelist = new.clone())?;
    if let Some(old) = entry.changelist {
        emit(
            notify,
            Notification::new(&path, NotifyAction::ChangelistClear).with_changelist(Some(old)),
        );
    }
    if new.is_some() {
        emit(
            notify,
            Notification::new(&path, NotifyAction::ChangelistSet).with_changelist(new.clone()),
        );
    }
    debug!(path = %path.display(), changelist = ?new, "changelist updated");
    Ok(())
}
