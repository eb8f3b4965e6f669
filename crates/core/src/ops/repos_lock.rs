//! Repository lock bookkeeping on file entries.

use std::path::Path;

use tracing::info;

use crate::entries::{self, RepoLock};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, NodeKind};
use crate::notify::{emit, LockState, Notification, NotificationSink, NotifyAction};

/// Record that the repository granted `lock` on the file `path`.
pub fn add_lock(
    set: &mut LockSet,
    path: &Path,
    lock: RepoLock,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    let path = normalize(path);
    let entry = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    if entry.kind != NodeKind::File {
        return Err(WcError::InvalidOperation {
            path,
            detail: "only files can be locked".into(),
        });
    }
    let recorded = lock.clone();
    entries::modify_entry(set, &path, |e| e.lock = Some(recorded.clone()))?;
    info!(path = %path.display(), owner = %lock.owner, "repository lock recorded");
    emit(
        notify,
        Notification::new(&path, NotifyAction::Locked)
            .with_kind(NodeKind::File)
            .with_lock(LockState::Locked, Some(lock)),
    );
    Ok(())
}

/// Forget the repository lock on `path`, if any.
pub fn remove_lock(set: &mut LockSet, path: &Path, notify: &dyn NotificationSink) -> Result<(), WcError> {
    let path = normalize(path);
    let entry = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    if entry.lock.is_none() {
        return Ok(());
    }
    entries::modify_entry(set, &path, |e| e.lock = None)?;
    info!(path = %path.display(), "repository lock removed");
    emit(
        notify,
        Notification::new(&path, NotifyAction::Unlocked)
            .with_kind(entry.kind)
            .with_lock(LockState::Unlocked, None),
    );
    Ok(())
}
