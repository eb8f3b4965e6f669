//! Persisted tree-conflict records.
//!
//! A descriptor lives in the entries file of the victim's parent directory,
//! keyed by the victim's name. File victims may reference up to four
//! fulltexts stored under the parent's `conflicts/` area.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ConflictAction, ConflictReason, Operation};
use crate::adm::{self, store, AdmPaths};
use crate::errors::WcError;
use crate::lock::{HandleId, LockSet};
use crate::models::{normalize, split_path, NodeKind};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction};

/// One recorded tree conflict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeConflictDescriptor {
    /// Absolute path of the victim; rebuilt from the parent on every read.
    #[serde(skip)]
    pub path: PathBuf,
    /// Name of the victim inside its parent.
    pub victim: String,
    pub node_kind: NodeKind,
    pub operation: Operation,
    pub action: ConflictAction,
    pub reason: ConflictReason,
    /// Names of fulltexts in the parent's `conflicts/` area (files only).
    #[serde(default)]
    pub base_file: Option<String>,
    #[serde(default)]
    pub their_file: Option<String>,
    #[serde(default)]
    pub my_file: Option<String>,
    #[serde(default)]
    pub merged_file: Option<String>,
}

impl TreeConflictDescriptor {
    pub fn new(
        path: &Path,
        node_kind: NodeKind,
        operation: Operation,
        action: ConflictAction,
        reason: ConflictReason,
    ) -> Result<Self, WcError> {
        let path = normalize(path);
        let (_, victim) = split_path(&path)?;
        Ok(Self {
            path,
            victim,
            node_kind,
            operation,
            action,
            reason,
            base_file: None,
            their_file: None,
            my_file: None,
            merged_file: None,
        })
    }

    fn fulltexts(&self) -> impl Iterator<Item = &str> {
        [&self.base_file, &self.their_file, &self.my_file, &self.merged_file]
            .into_iter()
            .filter_map(|f| f.as_deref())
    }
}

/// Store `data` as a conflict fulltext of the open directory `dir` and
/// return the name to reference it by.
pub fn store_conflict_text(set: &LockSet, dir: HandleId, data: &[u8]) -> Result<String, WcError> {
    set.require_write(dir)?;
    let adm_paths = set.adm(dir);
    std::fs::create_dir_all(adm_paths.conflicts_dir())?;
    let name = Uuid::new_v4().to_string();
    std::fs::write(adm_paths.conflicts_dir().join(&name), data)?;
    Ok(name)
}

/// Persist `desc` against its parent directory, replacing any earlier
/// record for the same victim.
pub fn record_tree_conflict(set: &mut LockSet, desc: &TreeConflictDescriptor) -> Result<(), WcError> {
    let (parent, _) = split_path(&desc.path)?;
    let parent_id = set.retrieve(&parent)?;
    let previous = set.modify_entries(parent_id, |file| {
        Ok(file.tree_conflicts.insert(desc.victim.clone(), desc.clone()))
    })?;
    if let Some(old) = previous {
        remove_fulltexts(&set.adm(parent_id), &old, Some(desc));
    }
    info!(
        path = %desc.path.display(),
        operation = %desc.operation,
        action = %desc.action,
        reason = %desc.reason,
        "tree conflict recorded"
    );
    Ok(())
}

/// The tree conflict recorded for `path`, if it is a victim.
///
/// The parent need not be in the set; its entries file is then read from
/// disk. A parent that is not a working copy has no conflicts.
pub fn tree_conflict(set: &LockSet, path: &Path) -> Result<Option<TreeConflictDescriptor>, WcError> {
    let path = normalize(path);
    let Ok((parent, name)) = split_path(&path) else {
        return Ok(None);
    };
    let found = match set.retrieve(&parent) {
        Ok(id) => set.entries_file(id)?.tree_conflicts.get(&name).cloned(),
        Err(_) => {
            if adm::check_wc(set.config(), &parent)?.is_none() {
                return Ok(None);
            }
            store::read_entries_file(&AdmPaths::new(set.config(), &parent))?
                .tree_conflicts
                .remove(&name)
        }
    };
    Ok(found.map(|mut desc| {
        desc.path = path;
        desc
    }))
}

/// Every tree conflict recorded in the open directory `dir`.
pub fn tree_conflicts_in(set: &LockSet, dir: HandleId) -> Result<Vec<TreeConflictDescriptor>, WcError> {
    let dir_path = set.path(dir).to_path_buf();
    Ok(set
        .entries_file(dir)?
        .tree_conflicts
        .values()
        .cloned()
        .map(|mut desc| {
            desc.path = dir_path.join(&desc.victim);
            desc
        })
        .collect())
}

/// Mark the tree conflict on `path` resolved.
///
/// Only the record for this one victim is removed, along with its stored
/// fulltexts. Returns whether a conflict was recorded.
pub fn resolved_tree_conflict(
    set: &mut LockSet,
    path: &Path,
    notify: &dyn NotificationSink,
) -> Result<bool, WcError> {
    let path = normalize(path);
    let (parent, name) = split_path(&path)?;
    let parent_id = set.retrieve(&parent)?;
    let removed = set.modify_entries(parent_id, |file| Ok(file.tree_conflicts.remove(&name)))?;

    let Some(desc) = removed else {
        debug!(path = %path.display(), "no tree conflict to resolve");
        return Ok(false);
    };
    remove_fulltexts(&set.adm(parent_id), &desc, None);
    info!(path = %path.display(), reason = %desc.reason, "tree conflict resolved");
    emit(
        notify,
        Notification::new(&path, NotifyAction::Resolved).with_kind(desc.node_kind),
    );
    Ok(true)
}

/// Delete the fulltexts of `old` that `keep` does not also reference.
fn remove_fulltexts(adm_paths: &AdmPaths, old: &TreeConflictDescriptor, keep: Option<&TreeConflictDescriptor>) {
    for name in old.fulltexts() {
        if keep.is_some_and(|k| k.fulltexts().any(|n| n == name)) {
            continue;
        }
        let file = adm_paths.conflicts_dir().join(name);
        if let Err(e) = std::fs::remove_file(&file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %file.display(), error = %e, "failed to remove conflict fulltext");
            }
        }
    }
}
