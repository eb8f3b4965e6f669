//! The merge driver.
//!
//! A merge applies the difference between two repository trees (`left`
//! and `right`) to a working copy target. Unlike update, every incoming
//! delete is checked against what the left side looked like: a target that
//! has drifted from it is a victim even without local modifications.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Drive, EditSummary, VictimTexts};
use crate::cancel::CancellationToken;
use crate::config::MergeConfig;
use crate::conflict::{
    divergence, merge_file, merge_props, ConflictAction, ConflictResolver, DetectOptions,
    LocalState, MergeFileOptions, MergeOutcome, Operation, TreeConflictDetector, TreeSnapshot,
    Verdict,
};
use crate::entries;
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{Depth, NodeKind, PropChange, Props, Revnum};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction, NotifyState, NullSink};
use crate::ops;

/// Switches of one merge.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Report what would happen without touching the working copy.
    pub dry_run: bool,
    /// Only record the merge; no file or tree changes are made.
    pub record_only: bool,
    /// Depth of the merge. Used in place of each directory's recorded depth
    /// when probing local state and comparing a deleted subtree.
    pub depth: Depth,
    /// Backup suffixes and marker labels for text conflicts.
    pub labels: MergeFileOptions,
}

impl MergeOptions {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            dry_run: false,
            record_only: false,
            depth: Depth::Infinity,
            labels: MergeFileOptions::from(config),
        }
    }
}

/// Receiver of a merge drive. Paths are relative to the merge target.
pub trait MergeCallbacks {
    /// A file changed between left and right.
    fn file_changed(
        &mut self,
        path: &str,
        left: &[u8],
        right: &[u8],
        prop_changes: &[PropChange],
        original_props: &Props,
    ) -> Result<(), WcError>;

    fn file_added(&mut self, path: &str, content: &[u8], props: &Props) -> Result<(), WcError>;

    /// A file present on the left side is gone on the right.
    fn file_deleted(&mut self, path: &str, left: &[u8], left_props: &Props) -> Result<(), WcError>;

    fn dir_added(&mut self, path: &str, props: &Props) -> Result<(), WcError>;

    /// A directory is gone on the right; `left` is how it looked before.
    fn dir_deleted(&mut self, path: &str, left: &TreeSnapshot) -> Result<(), WcError>;

    fn dir_props_changed(
        &mut self,
        path: &str,
        changes: &[PropChange],
        original_props: &Props,
    ) -> Result<(), WcError>;
}

/// Applies merge callbacks to a write-locked target.
pub struct MergeDriver<'a> {
    drive: Drive<'a>,
    resolver: &'a mut dyn ConflictResolver,
    detect: DetectOptions,
    options: MergeOptions,
    /// Directories a dry run pretended to add.
    dry_run_added: BTreeSet<PathBuf>,
}

impl<'a> MergeDriver<'a> {
    /// Start merging `range` into `target`; notifies `MergeBegin`.
    pub fn new(
        set: &'a mut LockSet,
        target: &Path,
        range: (Revnum, Revnum),
        options: MergeOptions,
        cancel: &'a CancellationToken,
        notify: &'a dyn NotificationSink,
        resolver: &'a mut dyn ConflictResolver,
    ) -> Result<Self, WcError> {
        let drive = Drive::new(set, target, Operation::Merge, cancel, notify)?;
        let mut detect = DetectOptions::new(Operation::Merge);
        detect.suppressed = options.record_only;
        let mut labels = options.labels.clone();
        labels.dry_run = options.dry_run;
        info!(
            target = %drive.anchor.display(),
            from = range.0,
            to = range.1,
            dry_run = options.dry_run,
            record_only = options.record_only,
            "merge started"
        );
        let mut begin = Notification::new(&drive.anchor, NotifyAction::MergeBegin).with_kind(NodeKind::Dir);
        begin.merge_range = Some(range);
        emit(notify, begin);
        Ok(Self {
            drive,
            resolver,
            detect,
            options: MergeOptions { labels, ..options },
            dry_run_added: BTreeSet::new(),
        })
    }

    /// End the merge and report the counts.
    pub fn finish(self) -> EditSummary {
        info!(
            target = %self.drive.anchor.display(),
            tree_conflicts = self.drive.summary.tree_conflicts,
            text_conflicts = self.drive.summary.text_conflicts,
            skipped = self.drive.summary.skipped,
            "merge finished"
        );
        self.drive.summary
    }

    fn inside_dry_run_add(&self, path: &Path) -> bool {
        self.dry_run_added.iter().any(|dir| path.starts_with(dir))
    }

    /// Common preamble of every callback; `None` means leave `path` alone.
    fn enter(&mut self, rel: &str, kind: NodeKind) -> Result<Option<PathBuf>, WcError> {
        self.drive.cancel.check()?;
        if self.options.record_only {
            return Ok(None);
        }
        let path = self.drive.abs(rel);
        if self.drive.skip_if_inside_victim(&path, kind) {
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Classify `action` at `path`; returns whether to apply it. `left` is
    /// compared against the target for deletes and supplies the base text
    /// of a file victim.
    fn admit(
        &mut self,
        path: &Path,
        action: ConflictAction,
        incoming_kind: NodeKind,
        left: Option<&TreeSnapshot>,
        theirs: Option<&[u8]>,
    ) -> Result<bool, WcError> {
        if self.inside_dry_run_add(path) {
            return Ok(true);
        }
        let mut local = LocalState::probe(self.drive.set, path, action, self.options.depth)?;
        if let Some(left) = left.filter(|_| action == ConflictAction::Delete) {
            let current = TreeSnapshot::capture(self.drive.set, path, self.options.depth)?;
            local.divergence = divergence(left, current.as_ref(), self.options.depth);
        }
        let kind = if local.versioned { local.entry_kind } else { incoming_kind };
        match TreeConflictDetector::classify(&self.detect, action, incoming_kind, &local) {
            Verdict::Proceed => Ok(true),
            Verdict::Skip(reason) => {
                self.drive.skip(path, kind, reason);
                Ok(false)
            }
            Verdict::Conflict(reason) => {
                let mut texts = VictimTexts {
                    theirs,
                    ..VictimTexts::default()
                };
                if kind == NodeKind::File {
                    texts.base = left.and_then(|l| match l {
                        TreeSnapshot::File { content, .. } => Some(content.clone()),
                        TreeSnapshot::Dir { .. } => None,
                    });
                    if path.is_file() {
                        texts.mine = Some(std::fs::read(path)?);
                    }
                }
                self.drive.conflict(path, kind, action, reason, texts)?;
                Ok(false)
            }
        }
    }

    fn merge_node_props(
        &mut self,
        path: &Path,
        changes: &[PropChange],
        original_props: &Props,
    ) -> Result<NotifyState, WcError> {
        if changes.is_empty() {
            return Ok(NotifyState::Unchanged);
        }
        if self.inside_dry_run_add(path) {
            return Ok(NotifyState::Changed);
        }
        let state = merge_props(
            self.drive.set,
            path,
            Some(original_props),
            changes,
            false,
            self.options.dry_run,
        )?;
        if state == NotifyState::Conflicted {
            self.drive.summary.prop_conflicts += 1;
        }
        Ok(state)
    }

    /// Put a freshly added node's incoming properties in place.
    fn set_added_props(&mut self, path: &Path, props: &Props) -> Result<(), WcError> {
        if props.is_empty() {
            return Ok(());
        }
        let mut node = entries::node_props(self.drive.set, path)?;
        node.working = props.clone();
        entries::write_node_props(self.drive.set, path, node)
    }

    fn notify(&self, path: &Path, action: NotifyAction, kind: NodeKind, content: NotifyState, props: NotifyState) {
        emit(
            self.drive.notify,
            Notification::new(path, action).with_kind(kind).with_states(content, props),
        );
    }
}

impl MergeCallbacks for MergeDriver<'_> {
    fn file_changed(
        &mut self,
        rel: &str,
        left: &[u8],
        right: &[u8],
        prop_changes: &[PropChange],
        original_props: &Props,
    ) -> Result<(), WcError> {
        let Some(path) = self.enter(rel, NodeKind::File)? else {
            return Ok(());
        };
        let left_snapshot = TreeSnapshot::file(left, original_props.clone());
        if !self.admit(&path, ConflictAction::Edit, NodeKind::File, Some(&left_snapshot), Some(right))? {
            return Ok(());
        }

        let content_state = if left == right {
            NotifyState::Unchanged
        } else {
            let outcome = merge_file(
                self.drive.set,
                left,
                right,
                &path,
                &self.options.labels,
                &mut *self.resolver,
            )?;
            match outcome {
                MergeOutcome::Unchanged => NotifyState::Unchanged,
                MergeOutcome::Merged => NotifyState::Merged,
                MergeOutcome::Conflict => {
                    self.drive.summary.text_conflicts += 1;
                    NotifyState::Conflicted
                }
                MergeOutcome::NoMerge => NotifyState::Missing,
            }
        };
        let prop_state = self.merge_node_props(&path, prop_changes, original_props)?;
        debug!(path = %path.display(), content = %content_state, props = %prop_state, "file merged");
        self.notify(&path, NotifyAction::UpdateUpdate, NodeKind::File, content_state, prop_state);
        Ok(())
    }

    fn file_added(&mut self, rel: &str, content: &[u8], props: &Props) -> Result<(), WcError> {
        let Some(path) = self.enter(rel, NodeKind::File)? else {
            return Ok(());
        };
        if !self.admit(&path, ConflictAction::Add, NodeKind::File, None, Some(content))? {
            return Ok(());
        }
        if !self.options.dry_run {
            std::fs::write(&path, content)?;
            ops::add(self.drive.set, &path, None, self.drive.cancel, &NullSink)?;
            self.set_added_props(&path, props)?;
        }
        self.notify(&path, NotifyAction::UpdateAdd, NodeKind::File, NotifyState::Changed, NotifyState::Inapplicable);
        Ok(())
    }

    fn file_deleted(&mut self, rel: &str, left: &[u8], left_props: &Props) -> Result<(), WcError> {
        let Some(path) = self.enter(rel, NodeKind::File)? else {
            return Ok(());
        };
        let left_snapshot = TreeSnapshot::file(left, left_props.clone());
        if !self.admit(&path, ConflictAction::Delete, NodeKind::File, Some(&left_snapshot), None)? {
            return Ok(());
        }
        if !self.options.dry_run && !self.inside_dry_run_add(&path) {
            ops::delete(self.drive.set, &path, false, self.drive.cancel, &NullSink)?;
        }
        self.notify(&path, NotifyAction::UpdateDelete, NodeKind::File, NotifyState::Inapplicable, NotifyState::Inapplicable);
        Ok(())
    }

    fn dir_added(&mut self, rel: &str, props: &Props) -> Result<(), WcError> {
        let Some(path) = self.enter(rel, NodeKind::Dir)? else {
            return Ok(());
        };
        if !self.admit(&path, ConflictAction::Add, NodeKind::Dir, None, None)? {
            return Ok(());
        }
        if self.options.dry_run {
            self.dry_run_added.insert(path.clone());
        } else {
            std::fs::create_dir(&path)?;
            ops::add(self.drive.set, &path, None, self.drive.cancel, &NullSink)?;
            self.set_added_props(&path, props)?;
        }
        self.notify(&path, NotifyAction::UpdateAdd, NodeKind::Dir, NotifyState::Inapplicable, NotifyState::Inapplicable);
        Ok(())
    }

    fn dir_deleted(&mut self, rel: &str, left: &TreeSnapshot) -> Result<(), WcError> {
        let Some(path) = self.enter(rel, NodeKind::Dir)? else {
            return Ok(());
        };
        if !self.admit(&path, ConflictAction::Delete, NodeKind::Dir, Some(left), None)? {
            return Ok(());
        }
        if !self.options.dry_run && !self.inside_dry_run_add(&path) {
            ops::delete(self.drive.set, &path, false, self.drive.cancel, &NullSink)?;
        }
        self.notify(&path, NotifyAction::UpdateDelete, NodeKind::Dir, NotifyState::Inapplicable, NotifyState::Inapplicable);
        Ok(())
    }

    fn dir_props_changed(
        &mut self,
        rel: &str,
        changes: &[PropChange],
        original_props: &Props,
    ) -> Result<(), WcError> {
        let Some(path) = self.enter(rel, NodeKind::Dir)? else {
            return Ok(());
        };
        // The merge target itself is never a victim.
        if !rel.is_empty() {
            if !self.admit(&path, ConflictAction::Edit, NodeKind::Dir, None, None)? {
                return Ok(());
            }
        }
        let prop_state = self.merge_node_props(&path, changes, original_props)?;
        self.notify(&path, NotifyAction::UpdateUpdate, NodeKind::Dir, NotifyState::Inapplicable, prop_state);
        Ok(())
    }
}
