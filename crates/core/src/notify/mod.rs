//! Notification events emitted once per completed action.
//!
//! Emission is fire-and-forget: a [`NotificationSink`] receives every event
//! but nothing it does can change the outcome of the operation. Every event
//! is also written to the `tracing` log at debug level.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entries::RepoLock;
use crate::models::{NodeKind, Revnum};

// ---------------------------------------------------------------------------
// Event vocabulary
// ---------------------------------------------------------------------------

/// What happened to a path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotifyAction {
    Add,
    Copy,
    Delete,
    Restore,
    Revert,
    FailedRevert,
    Resolved,
    Skip,
    UpdateDelete,
    UpdateAdd,
    UpdateUpdate,
    UpdateCompleted,
    StatusCompleted,
    CommitModified,
    CommitAdded,
    CommitDeleted,
    CommitReplaced,
    Locked,
    Unlocked,
    FailedLock,
    FailedUnlock,
    Exists,
    ChangelistSet,
    ChangelistClear,
    ChangelistFailed,
    MergeBegin,
    TreeConflict,
    PropertyAdded,
    PropertyModified,
    PropertyDeleted,
}

impl std::fmt::Display for NotifyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Copy => "copy",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::Revert => "revert",
            Self::FailedRevert => "failed_revert",
            Self::Resolved => "resolved",
            Self::Skip => "skip",
            Self::UpdateDelete => "update_delete",
            Self::UpdateAdd => "update_add",
            Self::UpdateUpdate => "update_update",
            Self::UpdateCompleted => "update_completed",
            Self::StatusCompleted => "status_completed",
            Self::CommitModified => "commit_modified",
            Self::CommitAdded => "commit_added",
            Self::CommitDeleted => "commit_deleted",
            Self::CommitReplaced => "commit_replaced",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::FailedLock => "failed_lock",
            Self::FailedUnlock => "failed_unlock",
            Self::Exists => "exists",
            Self::ChangelistSet => "changelist_set",
            Self::ChangelistClear => "changelist_clear",
            Self::ChangelistFailed => "changelist_failed",
            Self::MergeBegin => "merge_begin",
            Self::TreeConflict => "tree_conflict",
            Self::PropertyAdded => "property_added",
            Self::PropertyModified => "property_modified",
            Self::PropertyDeleted => "property_deleted",
        };
        write!(f, "{}", s)
    }
}

/// Post-action state of a node's content or properties.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotifyState {
    #[default]
    Inapplicable,
    Unknown,
    Unchanged,
    Missing,
    Obstructed,
    Changed,
    Merged,
    Conflicted,
}

impl std::fmt::Display for NotifyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inapplicable => write!(f, "inapplicable"),
            Self::Unknown => write!(f, "unknown"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Missing => write!(f, "missing"),
            Self::Obstructed => write!(f, "obstructed"),
            Self::Changed => write!(f, "changed"),
            Self::Merged => write!(f, "merged"),
            Self::Conflicted => write!(f, "conflicted"),
        }
    }
}

/// Post-action state of a repository lock.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    #[default]
    Inapplicable,
    Unknown,
    Unchanged,
    Locked,
    Unlocked,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// A single event about one path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub path: PathBuf,
    pub action: NotifyAction,
    pub kind: NodeKind,
    pub mime_type: Option<String>,
    pub content_state: NotifyState,
    pub prop_state: NotifyState,
    pub lock_state: LockState,
    pub lock: Option<RepoLock>,
    pub revision: Option<Revnum>,
    pub changelist: Option<String>,
    /// Revision range of a merge, set on `MergeBegin`.
    pub merge_range: Option<(Revnum, Revnum)>,
    /// Error text for the `Failed*` actions.
    pub error: Option<String>,
}

impl Notification {
    pub fn new(path: &Path, action: NotifyAction) -> Self {
        Self {
            path: path.to_path_buf(),
            action,
            kind: NodeKind::None,
            mime_type: None,
            content_state: NotifyState::Inapplicable,
            prop_state: NotifyState::Inapplicable,
            lock_state: LockState::Inapplicable,
            lock: None,
            revision: None,
            changelist: None,
            merge_range: None,
            error: None,
        }
    }

    /// A `Failed*` notification carrying the error text.
    pub fn failed(path: &Path, action: NotifyAction, error: &dyn std::fmt::Display) -> Self {
        let mut n = Self::new(path, action);
        n.error = Some(error.to_string());
        n
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_states(mut self, content: NotifyState, props: NotifyState) -> Self {
        self.content_state = content;
        self.prop_state = props;
        self
    }

    pub fn with_revision(mut self, revision: Option<Revnum>) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_lock(mut self, state: LockState, lock: Option<RepoLock>) -> Self {
        self.lock_state = state;
        self.lock = lock;
        self
    }

    pub fn with_changelist(mut self, changelist: Option<String>) -> Self {
        self.changelist = changelist;
        self
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receiver of notification events.
pub trait NotificationSink {
    fn notify(&self, notification: &Notification);
}

impl<F> NotificationSink for F
where
    F: Fn(&Notification),
{
    fn notify(&self, notification: &Notification) {
        self(notification)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: &Notification) {}
}

/// Records every event in order, for inspection after an operation.
#[derive(Debug, Default)]
pub struct NotificationLog {
    events: RefCell<Vec<Notification>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.borrow().clone()
    }

    pub fn actions(&self) -> Vec<NotifyAction> {
        self.events.borrow().iter().map(|n| n.action).collect()
    }

    pub fn count(&self, action: NotifyAction) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|n| n.action == action)
            .count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl NotificationSink for NotificationLog {
    fn notify(&self, notification: &Notification) {
        self.events.borrow_mut().push(notification.clone());
    }
}

/// Log `notification` and hand it to `sink`.
pub(crate) fn emit(sink: &dyn NotificationSink, notification: Notification) {
    debug!(
        path = %notification.path.display(),
        action = %notification.action,
        kind = %notification.kind,
        content = %notification.content_state,
        props = %notification.prop_state,
        "notify"
    );
    sink.notify(&notification);
}
