//! Whole-tree and single-path summaries built on the status classifier.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{status, StatusKind};
use crate::cancel::CancellationToken;
use crate::conflict;
use crate::entries::{self, Schedule};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, split_path, NodeKind, Revnum};

/// Revision range of a tree and whether any of it is switched or modified.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionStatus {
    pub min_rev: Option<Revnum>,
    pub max_rev: Option<Revnum>,
    pub switched: bool,
    pub modified: bool,
}

/// Summarize the tree at `path`.
///
/// With `committed` the last-changed revisions are summarized, otherwise
/// the base revisions; nodes scheduled for addition carry neither. The
/// target itself counts as switched only when `trail_url` is given and its
/// URL does not end with it.
pub fn revision_status(
    set: &LockSet,
    path: &Path,
    trail_url: Option<&str>,
    committed: bool,
    cancel: &CancellationToken,
) -> Result<RevisionStatus, WcError> {
    let path = normalize(path);
    let mut summary = RevisionStatus::default();

    entries::walk_entries(set, &path, false, cancel, |node, entry| {
        let revision = if committed { entry.cmt_rev } else { entry.revision };
        if let Some(rev) = revision.filter(|_| entry.schedule != Schedule::Add) {
            summary.min_rev = Some(summary.min_rev.map_or(rev, |m| m.min(rev)));
            summary.max_rev = Some(summary.max_rev.map_or(rev, |m| m.max(rev)));
        }

        let record = status(set, node)?;
        if node == path {
            let url = entry.url.as_deref().unwrap_or_default();
            summary.switched |= trail_url.is_some_and(|trail| !url.ends_with(trail.trim_end_matches('/')));
        } else {
            summary.switched |= record.switched;
        }
        summary.modified |= matches!(
            record.text_status,
            StatusKind::Modified
                | StatusKind::Added
                | StatusKind::Deleted
                | StatusKind::Replaced
                | StatusKind::Conflicted
        ) || matches!(record.prop_status, StatusKind::Modified | StatusKind::Conflicted);
        Ok(())
    })?;
    Ok(summary)
}

/// Which kinds of conflict `path` is in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conflicted {
    pub text: bool,
    pub props: bool,
    pub tree: bool,
}

impl Conflicted {
    pub fn any(&self) -> bool {
        self.text || self.props || self.tree
    }
}

/// Whether `path` has a text, property or tree conflict.
///
/// Text and property conflicts count only while one of their recorded
/// files still exists; deleting them by hand resolves the conflict.
/// Unversioned victims report only the tree conflict.
pub fn conflicted(set: &LockSet, path: &Path) -> Result<Conflicted, WcError> {
    let path = normalize(path);
    let tree = conflict::tree_conflict(set, &path)?.is_some();
    let Some(entry) = entries::entry(set, &path, false)? else {
        return Ok(Conflicted {
            tree,
            ..Conflicted::default()
        });
    };
    let parent = match split_path(&path) {
        Ok((parent, _)) => parent,
        Err(_) => path.clone(),
    };
    let exists = |name: &Option<String>, dir: &Path| {
        name.as_deref().is_some_and(|n| dir.join(n).exists())
    };
    let text = [&entry.conflict_old, &entry.conflict_new, &entry.conflict_wrk]
        .into_iter()
        .any(|name| exists(name, parent.as_path()));
    let prej_dir = if entry.kind == NodeKind::Dir { path.as_path() } else { parent.as_path() };
    Ok(Conflicted {
        text,
        props: exists(&entry.prejfile, prej_dir),
        tree,
    })
}
