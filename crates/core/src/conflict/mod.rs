//! Conflict detection, recording, three-way merging, and resolution.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- classifying each incoming structural change against
//!    local state ([`TreeConflictDetector`]).
//! 2. **Recording** -- persisting one [`TreeConflictDescriptor`] per victim in
//!    the parent's entries file until it is explicitly resolved.
//! 3. **Merging** -- three-way text merges and property merges.
//! 4. **Resolution** -- the [`ConflictResolver`] callback consulted for text
//!    and property conflicts.

pub mod detector;
pub mod merger;
pub mod props;
pub mod resolver;
pub mod snapshot;
pub mod tree;

use serde::{Deserialize, Serialize};

pub use detector::{DetectOptions, Divergence, LocalState, ObstructionPolicy, TreeConflictDetector, Verdict};
pub use merger::{merge_file, MergeFileOptions, MergeOutcome, MergeText, Merger};
pub use props::{merge_props, DIR_REJECT_FILE};
pub use resolver::{
    AlwaysChoose, ConflictChoice, ConflictDescription, ConflictKind, ConflictResolver, Postpone,
};
pub use snapshot::{divergence, TreeSnapshot};
pub use tree::{
    record_tree_conflict, resolved_tree_conflict, store_conflict_text, tree_conflict,
    tree_conflicts_in, TreeConflictDescriptor,
};

// ---------------------------------------------------------------------------
// Vocabulary shared by descriptors and the detector
// ---------------------------------------------------------------------------

/// The driving operation during which a conflict was found.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Update,
    Switch,
    Merge,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Update => write!(f, "update"),
            Self::Switch => write!(f, "switch"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// What the incoming change tried to do to the victim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    Edit,
    Add,
    Delete,
}

impl std::fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Edit => write!(f, "edit"),
            Self::Add => write!(f, "add"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// The local state that made the incoming change inapplicable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    Edited,
    Obstructed,
    Deleted,
    Missing,
    Unversioned,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Edited => write!(f, "edited"),
            Self::Obstructed => write!(f, "obstructed"),
            Self::Deleted => write!(f, "deleted"),
            Self::Missing => write!(f, "missing"),
            Self::Unversioned => write!(f, "unversioned"),
        }
    }
}
