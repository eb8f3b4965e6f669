use std::path::Path;

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::entries::{self, Entry};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, split_path, Depth, NodeKind, THIS_DIR};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction};

/// Which fulltext becomes the working file when a text conflict is marked
/// resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Accept {
    /// Keep the working file as it is, markers and all.
    #[default]
    Working,
    /// The common ancestor (`conflict_old`).
    Base,
    /// The incoming text (`conflict_new`).
    Theirs,
    /// The pre-merge working text (`conflict_wrk`).
    Mine,
}

/// Mark the text and/or property conflicts on `path` resolved, descending
/// to `depth`.
///
/// The backup and reject files are removed and the entry forgets them.
/// Tree conflicts are resolved separately, per victim.
#[allow(clippy::too_many_arguments)]
pub fn resolved_conflict(
    set: &mut LockSet,
    path: &Path,
    resolve_text: bool,
    resolve_props: bool,
    depth: Depth,
    accept: Accept,
    cancel: &CancellationToken,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    let path = normalize(path);
    let entry = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    let which = Which {
        text: resolve_text,
        props: resolve_props,
    };
    resolve_tree(set, &path, entry, which, depth, accept, cancel, notify)
}

#[derive(Clone, Copy)]
struct Which {
    text: bool,
    props: bool,
}

#[allow(clippy::too_many_arguments)]
fn resolve_tree(
    set: &mut LockSet,
    path: &Path,
    entry: Entry,
    which: Which,
    depth: Depth,
    accept: Accept,
    cancel: &CancellationToken,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    cancel.check()?;
    if which.text && entry.kind == NodeKind::File {
        accept_text(path, &entry, accept)?;
    }
    if clear_conflict_files(set, path, &entry, which.text, which.props)? {
        info!(path = %path.display(), "conflict resolved");
        emit(notify, Notification::new(path, NotifyAction::Resolved).with_kind(entry.kind));
    }

    if entry.kind != NodeKind::Dir {
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
        resolve_tree(set, &child_path, child, which, depth.descend(), accept, cancel, notify)?;
    }
    Ok(())
}

fn accept_text(path: &Path, entry: &Entry, accept: Accept) -> Result<(), WcError> {
    let source = match accept {
        Accept::Working => None,
        Accept::Base => entry.conflict_old.as_deref(),
        Accept::Theirs => entry.conflict_new.as_deref(),
        Accept::Mine => entry.conflict_wrk.as_deref(),
    };
    if let Some(name) = source {
        let (parent, _) = split_path(path)?;
        std::fs::copy(parent.join(name), path)?;
        debug!(path = %path.display(), source = name, "accepted conflict fulltext");
    }
    Ok(())
}

/// Delete the conflict backups (`text`) and reject file (`props`) of
/// `path` and clear them from its entry. Returns whether there were any.
pub(super) fn clear_conflict_files(
    set: &mut LockSet,
    path: &Path,
    entry: &Entry,
    text: bool,
    props: bool,
) -> Result<bool, WcError> {
    let (parent, _) = split_path(path)?;
    let mut files = Vec::new();
    if text {
        for name in [&entry.conflict_old, &entry.conflict_new, &entry.conflict_wrk]
            .into_iter()
            .flatten()
        {
            files.push(parent.join(name));
        }
    }
    let clear_text = !files.is_empty();
    let clear_props = props && entry.prejfile.is_some();
    if let Some(prej) = entry.prejfile.as_deref().filter(|_| clear_props) {
        let dir = if entry.kind == NodeKind::Dir { path } else { parent.as_path() };
        files.push(dir.join(prej));
    }
    if files.is_empty() {
        return Ok(false);
    }

    for file in &files {
        match std::fs::remove_file(file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    entries::modify_entry(set, path, |e| {
        if clear_text {
            e.conflict_old = None;
            e.conflict_new = None;
            e.conflict_wrk = None;
        }
        if clear_props {
            e.prejfile = None;
        }
    })?;
    Ok(true)
}
