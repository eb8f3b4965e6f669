//! Property merging with an append-only reject log.

use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use crate::entries;
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, split_path, NodeKind, PropChange, Props};
use crate::notify::NotifyState;

/// Reject file of a directory's own properties, inside the directory.
pub const DIR_REJECT_FILE: &str = "dir_conflicts.prej";

/// Merge the incoming property `changes` into the working properties of
/// `path`.
///
/// `base_props` are the properties the changes were made against; `None`
/// means the node's current base. A change conflicts when the working value
/// matches neither the old nor the new value; conflicts are appended to the
/// node's reject file and leave the working value alone. With `base_merge`
/// the base properties take every change unconditionally.
pub fn merge_props(
    set: &mut LockSet,
    path: &Path,
    base_props: Option<&Props>,
    changes: &[PropChange],
    base_merge: bool,
    dry_run: bool,
) -> Result<NotifyState, WcError> {
    let path = normalize(path);
    let entry = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    if changes.is_empty() {
        return Ok(NotifyState::Unchanged);
    }

    let mut node = entries::node_props(set, &path)?;
    let locally_modified = node.is_modified();
    let old_props = base_props.cloned().unwrap_or_else(|| node.base.clone());

    let mut rejects = Vec::new();
    let mut applied = 0usize;
    for change in changes {
        let from = old_props.get(&change.name);
        let to = change.value.as_ref();
        let working = node.working.get(&change.name);

        if base_merge {
            set_prop(&mut node.base, &change.name, to);
        }
        if working == to {
            continue;
        }
        if working == from {
            set_prop(&mut node.working, &change.name, to);
            applied += 1;
        } else {
            rejects.push(describe_reject(&change.name, from, to, node.base.get(&change.name), working));
        }
    }

    let state = if !rejects.is_empty() {
        NotifyState::Conflicted
    } else if applied > 0 && locally_modified {
        NotifyState::Merged
    } else if applied > 0 || base_merge {
        NotifyState::Changed
    } else {
        NotifyState::Unchanged
    };
    if dry_run {
        return Ok(state);
    }

    entries::write_node_props(set, &path, node)?;
    if !rejects.is_empty() {
        let (dir, reject_name) = reject_location(&path, entry.kind, entry.prejfile.as_deref())?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(&reject_name))?;
        for reject in &rejects {
            file.write_all(reject.as_bytes())?;
        }
        entries::modify_entry(set, &path, |e| e.prejfile = Some(reject_name.clone()))?;
        info!(path = %path.display(), conflicts = rejects.len(), "property conflicts recorded");
    }
    debug!(path = %path.display(), state = %state, "properties merged");
    Ok(state)
}

fn set_prop(props: &mut Props, name: &str, value: Option<&String>) {
    match value {
        Some(v) => {
            props.insert(name.to_string(), v.clone());
        }
        None => {
            props.remove(name);
        }
    }
}

/// Directory holding the reject file of `path`, and the file's name.
///
/// An existing reject file is reused so that repeated conflicts accumulate.
fn reject_location(
    path: &Path,
    kind: NodeKind,
    existing: Option<&str>,
) -> Result<(std::path::PathBuf, String), WcError> {
    let (parent, name) = split_path(path)?;
    let dir = if kind == NodeKind::Dir { path.to_path_buf() } else { parent };
    if let Some(existing) = existing {
        return Ok((dir, existing.to_string()));
    }
    let name = if kind == NodeKind::Dir {
        DIR_REJECT_FILE.to_string()
    } else {
        format!("{}.prej", name)
    };
    Ok((dir, name))
}

fn describe_reject(
    name: &str,
    from: Option<&String>,
    to: Option<&String>,
    base: Option<&String>,
    working: Option<&String>,
) -> String {
    let incoming = match (from, to) {
        (None, Some(t)) => format!("Trying to add new property '{}' with value '{}'", name, t),
        (Some(f), None) => format!("Trying to delete property '{}' with value '{}'", name, f),
        (Some(f), Some(t)) => format!("Trying to change property '{}' from '{}' to '{}'", name, f, t),
        (None, None) => format!("Trying to delete property '{}'", name),
    };
    let local = match (base, working) {
        (_, None) => "but the property has been locally deleted".to_string(),
        (None, Some(w)) => format!("but the property has been locally added with value '{}'", w),
        (Some(b), Some(w)) if b == w => format!("but the property already exists with value '{}'", w),
        (Some(b), Some(w)) => format!("but the property has been locally changed from '{}' to '{}'", b, w),
    };
    format!("{},\n{}.\n", incoming, local)
}
