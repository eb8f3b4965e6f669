//! Drivers applying incoming structural changes to a working copy.
//!
//! The repository-reporting layer (not part of this crate) drives either a
//! [`TreeEditor`] (update and switch) or the [`MergeCallbacks`] of a merge,
//! one path at a time, parents before children, with paths relative to the
//! anchor directory. Before each change is applied the tree-conflict
//! detector classifies it; victims are recorded, notified, and their
//! subtrees skipped while the drive carries on.

mod merge;
mod update;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adm::{pristine, AdmPaths};
use crate::cancel::CancellationToken;
use crate::conflict::{
    record_tree_conflict, store_conflict_text, ConflictAction, ConflictReason, MergeFileOptions,
    Merger, Operation, TreeConflictDescriptor,
};
use crate::entries;
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{
    join_relpath, looks_binary, normalize, split_path, NodeKind, PropChange, Props, Revnum,
};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction, NotifyState};

pub use merge::{MergeCallbacks, MergeDriver, MergeOptions};
pub use update::UpdateEditor;

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// Receiver of an update or switch drive.
///
/// Paths are `/`-separated and relative to the anchor; `""` is the anchor
/// itself. A directory is opened (added or edited) before anything below
/// it and closed after.
pub trait TreeEditor {
    fn set_target_revision(&mut self, revision: Revnum) -> Result<(), WcError>;

    fn delete_entry(&mut self, path: &str) -> Result<(), WcError>;

    fn add_directory(&mut self, path: &str, props: &[PropChange]) -> Result<(), WcError>;

    /// Open an existing directory, applying incoming property changes.
    fn edit_directory(&mut self, path: &str, props: &[PropChange]) -> Result<(), WcError>;

    fn close_directory(&mut self, path: &str) -> Result<(), WcError>;

    fn add_file(&mut self, path: &str, content: &[u8], props: &[PropChange]) -> Result<(), WcError>;

    /// Deliver a new fulltext (if the text changed) and property changes.
    fn edit_file(
        &mut self,
        path: &str,
        content: Option<&[u8]>,
        props: &[PropChange],
    ) -> Result<(), WcError>;

    /// Finish the drive and report what happened.
    fn close_edit(&mut self) -> Result<EditSummary, WcError>;
}

/// Counts reported at the end of a drive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSummary {
    pub target_revision: Option<Revnum>,
    pub tree_conflicts: usize,
    pub text_conflicts: usize,
    pub prop_conflicts: usize,
    pub skipped: usize,
}

impl EditSummary {
    /// Whether any path was left conflicted or untouched.
    pub fn has_problems(&self) -> bool {
        self.tree_conflicts + self.text_conflicts + self.prop_conflicts + self.skipped > 0
    }
}

// ---------------------------------------------------------------------------
// Shared drive state
// ---------------------------------------------------------------------------

/// Fulltexts saved with a file victim's descriptor.
#[derive(Debug, Default)]
pub(crate) struct VictimTexts<'t> {
    pub base: Option<Vec<u8>>,
    pub theirs: Option<&'t [u8]>,
    pub mine: Option<Vec<u8>>,
}

impl VictimTexts<'_> {
    /// Incoming change merged into the local text, markers included.
    /// `None` unless all three texts exist and none is binary.
    fn merged(&self) -> Option<String> {
        let (base, theirs, mine) = (self.base.as_deref()?, self.theirs?, self.mine.as_deref()?);
        if [base, theirs, mine].iter().any(|d| looks_binary(d)) {
            return None;
        }
        let text = |d: &[u8]| String::from_utf8_lossy(d).into_owned();
        let opts = MergeFileOptions::new("base", "theirs", "mine");
        let merged = Merger::three_way_merge(&text(base), &text(mine), &text(theirs), &opts);
        Some(merged.merged_content)
    }
}

/// Bookkeeping common to every driver: where the drive is anchored, which
/// subtrees are off limits, and the running counts.
pub(crate) struct Drive<'a> {
    pub set: &'a mut LockSet,
    pub anchor: PathBuf,
    pub operation: Operation,
    pub cancel: &'a CancellationToken,
    pub notify: &'a dyn NotificationSink,
    skipped: BTreeSet<PathBuf>,
    pub summary: EditSummary,
}

impl<'a> Drive<'a> {
    pub fn new(
        set: &'a mut LockSet,
        anchor: &Path,
        operation: Operation,
        cancel: &'a CancellationToken,
        notify: &'a dyn NotificationSink,
    ) -> Result<Self, WcError> {
        let anchor = normalize(anchor);
        let id = set.retrieve(&anchor)?;
        set.require_write(id)?;
        Ok(Self {
            set,
            anchor,
            operation,
            cancel,
            notify,
            skipped: BTreeSet::new(),
            summary: EditSummary::default(),
        })
    }

    pub fn abs(&self, rel: &str) -> PathBuf {
        join_relpath(&self.anchor, rel)
    }

    /// Whether `path` lies in a subtree already skipped or conflicted.
    pub fn is_skipped(&self, path: &Path) -> bool {
        self.skipped.iter().any(|root| path.starts_with(root))
    }

    /// Report `path` as skipped if it lies below a victim; returns whether
    /// it did.
    pub fn skip_if_inside_victim(&mut self, path: &Path, kind: NodeKind) -> bool {
        if !self.is_skipped(path) {
            return false;
        }
        debug!(path = %path.display(), "inside a skipped subtree");
        self.summary.skipped += 1;
        emit(self.notify, Notification::new(path, NotifyAction::Skip).with_kind(kind));
        true
    }

    /// Leave `path` and its subtree alone without a conflict.
    pub fn skip(&mut self, path: &Path, kind: NodeKind, reason: ConflictReason) {
        debug!(path = %path.display(), reason = %reason, "skipped");
        self.skipped.insert(path.to_path_buf());
        self.summary.skipped += 1;
        let state = match reason {
            ConflictReason::Missing => NotifyState::Missing,
            ConflictReason::Obstructed | ConflictReason::Unversioned => NotifyState::Obstructed,
            _ => NotifyState::Unknown,
        };
        emit(
            self.notify,
            Notification::new(path, NotifyAction::Skip)
                .with_kind(kind)
                .with_states(state, NotifyState::Inapplicable),
        );
    }

    /// Record a tree conflict on `path` and skip its subtree.
    pub fn conflict(
        &mut self,
        path: &Path,
        kind: NodeKind,
        action: ConflictAction,
        reason: ConflictReason,
        texts: VictimTexts<'_>,
    ) -> Result<(), WcError> {
        let mut desc = TreeConflictDescriptor::new(path, kind, self.operation, action, reason)?;
        if kind == NodeKind::File {
            let (parent, _) = split_path(path)?;
            let parent_id = self.set.retrieve(&parent)?;
            let set: &LockSet = self.set;
            let store = |data: Option<&[u8]>| -> Result<Option<String>, WcError> {
                data.map(|d| store_conflict_text(set, parent_id, d)).transpose()
            };
            desc.base_file = store(texts.base.as_deref())?;
            desc.their_file = store(texts.theirs)?;
            desc.my_file = store(texts.mine.as_deref())?;
            desc.merged_file = store(texts.merged().as_deref().map(str::as_bytes))?;
        }
        record_tree_conflict(self.set, &desc)?;
        warn!(path = %path.display(), action = %action, reason = %reason, "tree conflict");
        self.skipped.insert(path.to_path_buf());
        self.summary.tree_conflicts += 1;
        emit(
            self.notify,
            Notification::new(path, NotifyAction::TreeConflict).with_kind(kind),
        );
        Ok(())
    }

    /// Pristine text and working text of a local file, for victim records.
    pub fn local_texts(&self, path: &Path) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>), WcError> {
        let base = match entries::entry(&*self.set, path, false)?.and_then(|e| e.checksum) {
            Some(sum) => {
                let (parent, _) = split_path(path)?;
                Some(pristine::read_verified(
                    &AdmPaths::new(self.set.config(), &parent),
                    &sum,
                    path,
                )?)
            }
            None => None,
        };
        let mine = if path.is_file() {
            Some(std::fs::read(path)?)
        } else {
            None
        };
        Ok((base, mine))
    }
}

/// Apply property changes to a fresh set of properties.
pub(crate) fn props_from_changes(changes: &[PropChange]) -> Props {
    let mut props = Props::new();
    for change in changes {
        if let Some(value) = &change.value {
            props.insert(change.name.clone(), value.clone());
        }
    }
    props
}
