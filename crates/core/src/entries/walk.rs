//! Depth-first traversal of entries.

use std::path::Path;

use super::Entry;
use crate::cancel::CancellationToken;
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, NodeKind, THIS_DIR};

/// Visit every entry under `path`, a directory's self entry before its
/// children.
///
/// Subdirectories open in the set are descended into; others (missing or
/// not locked) are reported through their parent's stub only. Cancellation
/// is polled once per visited node.
pub fn walk_entries<F>(
    set: &LockSet,
    path: &Path,
    show_hidden: bool,
    cancel: &CancellationToken,
    mut visit: F,
) -> Result<(), WcError>
where
    F: FnMut(&Path, &Entry) -> Result<(), WcError>,
{
    let path = normalize(path);
    match set.retrieve(&path) {
        Ok(_) => walk_dir(set, &path, show_hidden, cancel, &mut visit),
        Err(_) => {
            cancel.check()?;
            let entry = super::entry(set, &path, show_hidden)?
                .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
            visit(&path, &entry)
        }
    }
}

fn walk_dir<F>(
    set: &LockSet,
    dir: &Path,
    show_hidden: bool,
    cancel: &CancellationToken,
    visit: &mut F,
) -> Result<(), WcError>
where
    F: FnMut(&Path, &Entry) -> Result<(), WcError>,
{
    let id = set.retrieve(dir)?;
    let entries = super::entries_read(set, id, show_hidden)?;

    if let Some(this_dir) = entries.get(THIS_DIR) {
        cancel.check()?;
        visit(dir, this_dir)?;
    }

    for (name, entry) in entries.iter().filter(|(name, _)| !name.is_empty()) {
        let child = dir.join(name);
        if entry.kind == NodeKind::Dir && set.retrieve(&child).is_ok() {
            walk_dir(set, &child, show_hidden, cancel, visit)?;
        } else {
            cancel.check()?;
            visit(&child, entry)?;
        }
    }
    Ok(())
}
