//! Tree-conflict detection.
//!
//! Given the local state of one path and the structural change arriving for
//! it, the detector decides whether the change may be applied, must be
//! skipped, or conflicts. Classification is a pure function; gathering the
//! local state is done separately by [`LocalState::probe`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ConflictAction, ConflictReason, Operation};
use crate::entries::{self, Schedule};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{Depth, NodeKind};
use crate::status::tree_modified;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which reason wins when a path is both obstructed and locally deleted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObstructionPolicy {
    #[default]
    ObstructionFirst,
    DeletedFirst,
}

/// Per-operation detector settings.
#[derive(Debug, Clone, Copy)]
pub struct DetectOptions {
    pub operation: Operation,
    /// Update/switch `force` or merge `record_only`: never raise conflicts.
    pub suppressed: bool,
    pub policy: ObstructionPolicy,
}

impl DetectOptions {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            suppressed: false,
            policy: ObstructionPolicy::default(),
        }
    }
}

/// How a merge target differs from the merge-left snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divergence {
    Content,
    Kind,
}

/// What the working copy holds at one path.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalState {
    /// A visible (not deleted/absent) entry exists.
    pub versioned: bool,
    pub schedule: Schedule,
    pub entry_kind: NodeKind,
    pub disk_kind: NodeKind,
    /// Text, property or descendant modifications (only gathered for deletes).
    pub modified: bool,
    /// Merge only: difference from the merge-left snapshot.
    pub divergence: Option<Divergence>,
}

impl LocalState {
    /// Nothing versioned and nothing on disk.
    pub fn empty() -> Self {
        Self {
            versioned: false,
            schedule: Schedule::Normal,
            entry_kind: NodeKind::None,
            disk_kind: NodeKind::None,
            modified: false,
            divergence: None,
        }
    }

    /// Gather the state of `path`, whose parent must be open in `set`.
    ///
    /// Modifications are only computed for an incoming delete, to `depth`.
    /// A node scheduled for deletion is never reported as modified.
    pub fn probe(
        set: &LockSet,
        path: &Path,
        action: ConflictAction,
        depth: Depth,
    ) -> Result<Self, WcError> {
        let disk_kind = NodeKind::on_disk(path)?;
        let Some(entry) = entries::entry(set, path, false)? else {
            return Ok(Self {
                disk_kind,
                ..Self::empty()
            });
        };
        let modified = action == ConflictAction::Delete
            && entry.schedule != Schedule::Delete
            && disk_kind != NodeKind::None
            && tree_modified(set, path, depth)?;
        Ok(Self {
            versioned: true,
            schedule: entry.schedule,
            entry_kind: entry.kind,
            disk_kind,
            modified,
            divergence: None,
        })
    }

    fn present(&self) -> bool {
        self.disk_kind != NodeKind::None
    }

    fn locally_deleted(&self) -> bool {
        self.versioned && self.schedule == Schedule::Delete
    }

    fn obstructed(&self, action: ConflictAction) -> bool {
        match action {
            ConflictAction::Add => {
                (!self.versioned && self.present())
                    || (self.versioned && self.schedule != Schedule::Delete)
            }
            ConflictAction::Edit | ConflictAction::Delete => {
                self.versioned && self.present() && self.disk_kind != self.entry_kind
            }
        }
    }
}

/// Outcome of classifying one incoming change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Apply the change.
    Proceed,
    /// Detection is suppressed; leave the path (and its subtree) alone.
    Skip(ConflictReason),
    /// Record a tree conflict and skip the path (and its subtree).
    Conflict(ConflictReason),
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Stateless tree-conflict classifier.
pub struct TreeConflictDetector;

impl TreeConflictDetector {
    /// Classify `action` of an `incoming_kind` node against `local`.
    ///
    /// When detection is suppressed, an add over an obstruction of the same
    /// kind adopts it; anything else that would conflict is skipped.
    pub fn classify(
        opts: &DetectOptions,
        action: ConflictAction,
        incoming_kind: NodeKind,
        local: &LocalState,
    ) -> Verdict {
        let verdict = match Self::reason(opts, action, local) {
            None => Verdict::Proceed,
            Some(reason) if opts.suppressed => {
                if action == ConflictAction::Add
                    && reason == ConflictReason::Obstructed
                    && local.disk_kind == incoming_kind
                {
                    Verdict::Proceed
                } else {
                    Verdict::Skip(reason)
                }
            }
            Some(reason) => Verdict::Conflict(reason),
        };
        debug!(
            operation = %opts.operation,
            action = %action,
            verdict = ?verdict,
            "classified incoming change"
        );
        verdict
    }

    fn reason(opts: &DetectOptions, action: ConflictAction, local: &LocalState) -> Option<ConflictReason> {
        let obstructed = local.obstructed(action);
        let deleted = local.locally_deleted();
        if obstructed && deleted {
            return Some(match opts.policy {
                ObstructionPolicy::ObstructionFirst => ConflictReason::Obstructed,
                ObstructionPolicy::DeletedFirst => ConflictReason::Deleted,
            });
        }
        if obstructed {
            return Some(ConflictReason::Obstructed);
        }

        match action {
            ConflictAction::Edit => {
                if deleted {
                    Some(ConflictReason::Deleted)
                } else if !local.versioned && local.present() {
                    Some(ConflictReason::Unversioned)
                } else if !local.versioned || !local.present() {
                    Some(ConflictReason::Missing)
                } else {
                    None
                }
            }
            ConflictAction::Delete => {
                if local.modified {
                    Some(ConflictReason::Edited)
                } else if deleted {
                    Some(ConflictReason::Deleted)
                } else if !local.versioned && local.present() {
                    Some(ConflictReason::Unversioned)
                } else if !local.versioned || !local.present() {
                    Some(ConflictReason::Missing)
                } else if opts.operation == Operation::Merge {
                    local.divergence.map(|d| match d {
                        Divergence::Content => ConflictReason::Edited,
                        Divergence::Kind => ConflictReason::Obstructed,
                    })
                } else {
                    None
                }
            }
            ConflictAction::Add => deleted.then_some(ConflictReason::Deleted),
        }
    }
}
