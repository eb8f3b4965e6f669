//! Local operations on versioned nodes.
//!
//! Each operation works through a [`LockSet`](crate::lock::LockSet) whose
//! relevant directories the caller has opened for writing, and reports what
//! it did through a [`NotificationSink`](crate::notify::NotificationSink).

mod add;
mod changelist;
mod committed;
mod copy;
mod delete;
mod props;
mod relocate;
mod remove;
mod repos_lock;
mod resolve;
mod revert;

pub use add::add;
pub use changelist::set_changelist;
pub use committed::{process_committed, CommitInfo};
pub use copy::copy;
pub use delete::{delete, mark_missing_deleted};
pub use props::{prop_get, prop_list, prop_set};
pub use relocate::{relocate, Relocation};
pub use remove::remove_from_revision_control;
pub use repos_lock::{add_lock, remove_lock};
pub use resolve::{resolved_conflict, Accept};
pub use revert::{restore, revert};

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::adm::{pristine, AdmPaths};
use crate::entries;
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::split_path;

/// Write `data` as the working text of the versioned file `path` and stamp
/// its entry.
///
/// `data` must equal the file's pristine. With `use_commit_times` and a
/// known `commit_time`, the file's mtime is set to the commit time first.
pub(crate) fn install_working(
    set: &mut LockSet,
    path: &Path,
    data: &[u8],
    commit_time: Option<DateTime<Utc>>,
) -> Result<(), WcError> {
    std::fs::write(path, data)?;
    if let Some(time) = commit_time.filter(|_| set.config().update.use_commit_times) {
        let file = std::fs::File::options().write(true).open(path)?;
        file.set_modified(time.into())?;
    }
    entries::stamp(set, path)
}

/// Put the pristine text `checksum` back over the working file `path`.
pub(crate) fn restore_text(
    set: &mut LockSet,
    path: &Path,
    checksum: &str,
    commit_time: Option<DateTime<Utc>>,
) -> Result<(), WcError> {
    let (parent, _) = split_path(path)?;
    let data = pristine::read_verified(&AdmPaths::new(set.config(), &parent), checksum, path)?;
    install_working(set, path, &data, commit_time)
}
