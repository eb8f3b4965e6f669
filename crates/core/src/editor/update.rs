//! The update/switch editor.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{props_from_changes, Drive, EditSummary, TreeEditor, VictimTexts};
use crate::adm::props::NodeProps;
use crate::adm::{self, pristine, AdmInit, AdmPaths};
use crate::cancel::CancellationToken;
use crate::conflict::{
    merge_file, merge_props, ConflictAction, ConflictResolver, DetectOptions, LocalState,
    MergeFileOptions, MergeOutcome, ObstructionPolicy, Operation, TreeConflictDetector, Verdict,
};
use crate::entries::{self, Entry, Schedule};
use crate::errors::WcError;
use crate::lock::{LockDepth, LockMode, LockSet};
use crate::models::{join_url, split_path, Depth, NodeKind, PropChange, Revnum, THIS_DIR};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction, NotifyState};
use crate::ops::{install_working, remove_from_revision_control};

/// Applies an update (or switch) drive to a write-locked anchor.
pub struct UpdateEditor<'a> {
    drive: Drive<'a>,
    resolver: &'a mut dyn ConflictResolver,
    detect: DetectOptions,
    /// URL the anchor ends up at.
    base_url: String,
    repos: Option<String>,
    uuid: Option<String>,
    target_revision: Option<Revnum>,
}

impl<'a> UpdateEditor<'a> {
    /// Editor for an update of `anchor`, which must be write-locked in
    /// `set` together with everything below it that the drive may touch.
    pub fn new(
        set: &'a mut LockSet,
        anchor: &Path,
        cancel: &'a CancellationToken,
        notify: &'a dyn NotificationSink,
        resolver: &'a mut dyn ConflictResolver,
    ) -> Result<Self, WcError> {
        Self::build(set, anchor, None, Operation::Update, cancel, notify, resolver)
    }

    /// Editor moving `anchor` to `switch_url`, in the same repository.
    pub fn switch(
        set: &'a mut LockSet,
        anchor: &Path,
        switch_url: &str,
        cancel: &'a CancellationToken,
        notify: &'a dyn NotificationSink,
        resolver: &'a mut dyn ConflictResolver,
    ) -> Result<Self, WcError> {
        Self::build(set, anchor, Some(switch_url), Operation::Switch, cancel, notify, resolver)
    }

    fn build(
        set: &'a mut LockSet,
        anchor: &Path,
        switch_url: Option<&str>,
        operation: Operation,
        cancel: &'a CancellationToken,
        notify: &'a dyn NotificationSink,
        resolver: &'a mut dyn ConflictResolver,
    ) -> Result<Self, WcError> {
        let drive = Drive::new(set, anchor, operation, cancel, notify)?;
        let anchor_entry = entries::entry(drive.set, &drive.anchor, false)?
            .ok_or_else(|| WcError::EntryNotFound(drive.anchor.clone()))?;
        let current_url = anchor_entry.url.clone().unwrap_or_default();
        let base_url = match switch_url {
            Some(url) => {
                let same_repos = anchor_entry
                    .repos
                    .as_deref()
                    .is_some_and(|root| url.starts_with(root));
                if !same_repos {
                    return Err(WcError::InvalidOperation {
                        path: drive.anchor.clone(),
                        detail: format!("'{}' is not in the same repository", url),
                    });
                }
                url.trim_end_matches('/').to_string()
            }
            None => current_url,
        };
        info!(anchor = %drive.anchor.display(), operation = %operation, url = %base_url, "starting drive");
        Ok(Self {
            drive,
            resolver,
            detect: DetectOptions::new(operation),
            base_url,
            repos: anchor_entry.repos,
            uuid: anchor_entry.uuid,
            target_revision: None,
        })
    }

    /// Tolerate obstructions instead of raising tree conflicts.
    pub fn with_force(mut self, force: bool) -> Self {
        self.detect.suppressed = force;
        self
    }

    pub fn with_policy(mut self, policy: ObstructionPolicy) -> Self {
        self.detect.policy = policy;
        self
    }

    fn revision(&self) -> Result<Revnum, WcError> {
        self.target_revision.ok_or_else(|| WcError::InvalidOperation {
            path: self.drive.anchor.clone(),
            detail: "no target revision set".into(),
        })
    }

    /// Classify `action` at `path`, recording or skipping as needed.
    /// Returns whether the change should be applied.
    fn admit(
        &mut self,
        path: &Path,
        action: ConflictAction,
        incoming_kind: NodeKind,
        theirs: Option<&[u8]>,
    ) -> Result<bool, WcError> {
        self.drive.cancel.check()?;
        if self.drive.skip_if_inside_victim(path, incoming_kind) {
            return Ok(false);
        }
        let depth = match entries::entry(self.drive.set, path, false)? {
            Some(e) if e.kind == NodeKind::Dir => e.depth,
            _ => Depth::Infinity,
        };
        let local = LocalState::probe(self.drive.set, path, action, depth)?;
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
                if kind == NodeKind::File && local.versioned {
                    let (base, mine) = self.drive.local_texts(path)?;
                    texts.base = base;
                    texts.mine = mine;
                }
                self.drive.conflict(path, kind, action, reason, texts)?;
                Ok(false)
            }
        }
    }

    fn url_of(&self, rel: &str) -> String {
        join_url(&self.base_url, rel)
    }

    /// Install `content` as the new pristine of `path` and, when the working
    /// file has no local edits, as its working text too.
    fn install_text(&mut self, path: &Path, entry: &Entry, content: &[u8], new_rev: Revnum) -> Result<NotifyState, WcError> {
        let (parent, name) = split_path(path)?;
        let parent_id = self.drive.set.retrieve(&parent)?;
        let adm_paths = self.drive.set.adm(parent_id);
        let locally_modified = path.exists() && crate::status::text_modified(self.drive.set, path, false)?;

        let state = if !locally_modified {
            NotifyState::Changed
        } else {
            let old_base = match entry.checksum.as_deref() {
                Some(sum) => pristine::read_verified(&adm_paths, sum, path)?,
                None => Vec::new(),
            };
            let old_rev = entry.revision.unwrap_or(0);
            let opts = MergeFileOptions::new(&format!(".r{}", old_rev), &format!(".r{}", new_rev), ".mine");
            match merge_file(self.drive.set, &old_base, content, path, &opts, &mut *self.resolver)? {
                MergeOutcome::Conflict => {
                    self.drive.summary.text_conflicts += 1;
                    NotifyState::Conflicted
                }
                MergeOutcome::Unchanged | MergeOutcome::Merged => NotifyState::Merged,
                MergeOutcome::NoMerge => NotifyState::Missing,
            }
        };

        let sum = pristine::install(&adm_paths, content)?;
        entries::modify_entry(self.drive.set, path, |e| {
            e.checksum = Some(sum.clone());
            e.text_time = None;
            e.working_size = None;
        })?;
        if !locally_modified {
            install_working(self.drive.set, path, content, None)?;
        } else if std::fs::read(path)? == content {
            entries::stamp(self.drive.set, path)?;
        }
        debug!(path = %path.display(), name = %name, state = %state, "text installed");
        Ok(state)
    }

    fn apply_props(&mut self, path: &Path, props: &[PropChange]) -> Result<NotifyState, WcError> {
        if props.is_empty() {
            return Ok(NotifyState::Unchanged);
        }
        let state = merge_props(self.drive.set, path, None, props, true, false)?;
        if state == NotifyState::Conflicted {
            self.drive.summary.prop_conflicts += 1;
        }
        Ok(state)
    }

    /// Give every node outside the skipped subtrees the target revision
    /// (and, for a switch, its new URL).
    fn bump(&mut self, revision: Revnum) -> Result<(), WcError> {
        let mut nodes: Vec<(PathBuf, Entry)> = Vec::new();
        entries::walk_entries(self.drive.set, &self.drive.anchor, false, self.drive.cancel, |p, e| {
            nodes.push((p.to_path_buf(), e.clone()));
            Ok(())
        })?;
        let switching = self.detect.operation == Operation::Switch;
        for (path, entry) in nodes {
            if self.drive.is_skipped(&path) || matches!(entry.schedule, Schedule::Add | Schedule::Replace) {
                continue;
            }
            let rel = path
                .strip_prefix(&self.drive.anchor)
                .map(|r| r.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/"))
                .unwrap_or_default();
            let url = switching.then(|| self.url_of(&rel));
            entries::modify_entry(self.drive.set, &path, |e| {
                e.revision = Some(revision);
                if let Some(url) = &url {
                    if e.kind == NodeKind::File || e.name == THIS_DIR {
                        e.url = Some(url.clone());
                    }
                }
            })?;
        }
        Ok(())
    }
}

impl TreeEditor for UpdateEditor<'_> {
    fn set_target_revision(&mut self, revision: Revnum) -> Result<(), WcError> {
        self.drive.cancel.check()?;
        self.target_revision = Some(revision);
        self.drive.summary.target_revision = Some(revision);
        Ok(())
    }

    fn delete_entry(&mut self, rel: &str) -> Result<(), WcError> {
        let path = self.drive.abs(rel);
        let kind = entries::entry(self.drive.set, &path, false)?.map_or(NodeKind::None, |e| e.kind);
        if !self.admit(&path, ConflictAction::Delete, kind, None)? {
            return Ok(());
        }
        let (parent, name) = split_path(&path)?;
        let parent_id = self.drive.set.retrieve(&parent)?;
        let cancel = self.drive.cancel;
        if kind == NodeKind::Dir {
            let id = self.drive.set.retrieve(&path)?;
            remove_from_revision_control(self.drive.set, id, THIS_DIR, true, true, cancel)?;
        } else {
            remove_from_revision_control(self.drive.set, parent_id, &name, true, true, cancel)?;
        }
        info!(path = %path.display(), "deleted by update");
        emit(self.drive.notify, Notification::new(&path, NotifyAction::UpdateDelete).with_kind(kind));
        Ok(())
    }

    fn add_directory(&mut self, rel: &str, props: &[PropChange]) -> Result<(), WcError> {
        let path = self.drive.abs(rel);
        if !self.admit(&path, ConflictAction::Add, NodeKind::Dir, None)? {
            return Ok(());
        }
        let revision = self.revision()?;
        let existed = path.is_dir();
        let (parent, name) = split_path(&path)?;
        let parent_id = self.drive.set.retrieve(&parent)?;

        std::fs::create_dir_all(&path)?;
        let init = AdmInit {
            url: self.url_of(rel),
            repos: self.repos.clone(),
            uuid: self.uuid.clone(),
            revision,
            depth: Depth::Infinity,
        };
        adm::ensure_adm(self.drive.set.config(), &path, &init)?;
        let mut stub = Entry::new(&name, NodeKind::Dir);
        stub.revision = Some(revision);
        stub.incomplete = true;
        entries::write_entry(self.drive.set, parent_id, stub)?;
        if self.drive.set.retrieve(&path).is_err() {
            self.drive
                .set
                .open_in(&path, LockMode::Write, LockDepth::THIS_DIR, self.drive.cancel)?;
        }
        entries::modify_entry(self.drive.set, &path, |e| {
            e.incomplete = true;
            e.revision = Some(revision);
        })?;
        if !props.is_empty() {
            let all = props_from_changes(props);
            let node = NodeProps {
                base: all.clone(),
                working: all,
            };
            entries::write_node_props(self.drive.set, &path, node)?;
        }

        let action = if existed { NotifyAction::Exists } else { NotifyAction::UpdateAdd };
        emit(self.drive.notify, Notification::new(&path, action).with_kind(NodeKind::Dir));
        Ok(())
    }

    fn edit_directory(&mut self, rel: &str, props: &[PropChange]) -> Result<(), WcError> {
        let path = self.drive.abs(rel);
        // The anchor's parent is outside the drive; it cannot be a victim.
        if !rel.is_empty() && !self.admit(&path, ConflictAction::Edit, NodeKind::Dir, None)? {
            return Ok(());
        }
        self.drive.cancel.check()?;
        let prop_state = self.apply_props(&path, props)?;
        if !props.is_empty() {
            emit(
                self.drive.notify,
                Notification::new(&path, NotifyAction::UpdateUpdate)
                    .with_kind(NodeKind::Dir)
                    .with_states(NotifyState::Inapplicable, prop_state),
            );
        }
        Ok(())
    }

    fn close_directory(&mut self, rel: &str) -> Result<(), WcError> {
        let path = self.drive.abs(rel);
        if self.drive.is_skipped(&path) {
            return Ok(());
        }
        if entries::entry(self.drive.set, &path, false)?.is_some_and(|e| e.incomplete) {
            entries::modify_entry(self.drive.set, &path, |e| e.incomplete = false)?;
        }
        Ok(())
    }

    fn add_file(&mut self, rel: &str, content: &[u8], props: &[PropChange]) -> Result<(), WcError> {
        let path = self.drive.abs(rel);
        if !self.admit(&path, ConflictAction::Add, NodeKind::File, Some(content))? {
            return Ok(());
        }
        let revision = self.revision()?;
        let (parent, name) = split_path(&path)?;
        let parent_id = self.drive.set.retrieve(&parent)?;
        let existed = path.is_file();

        let sum = pristine::install(&AdmPaths::new(self.drive.set.config(), &parent), content)?;
        let mut entry = Entry::new(&name, NodeKind::File);
        entry.revision = Some(revision);
        entry.url = Some(self.url_of(rel));
        entry.repos = self.repos.clone();
        entry.uuid = self.uuid.clone();
        entry.checksum = Some(sum);
        entries::write_entry(self.drive.set, parent_id, entry)?;

        let all = props_from_changes(props);
        if !all.is_empty() {
            let node = NodeProps {
                base: all.clone(),
                working: all,
            };
            entries::write_node_props(self.drive.set, &path, node)?;
        }
        // An adopted obstruction keeps its text; it shows up as modified.
        if !existed {
            install_working(self.drive.set, &path, content, None)?;
        } else if std::fs::read(&path)? == content {
            entries::stamp(self.drive.set, &path)?;
        }

        let action = if existed { NotifyAction::Exists } else { NotifyAction::UpdateAdd };
        emit(
            self.drive.notify,
            Notification::new(&path, action)
                .with_kind(NodeKind::File)
                .with_states(NotifyState::Changed, NotifyState::Inapplicable)
                .with_revision(Some(revision)),
        );
        Ok(())
    }

    fn edit_file(&mut self, rel: &str, content: Option<&[u8]>, props: &[PropChange]) -> Result<(), WcError> {
        let path = self.drive.abs(rel);
        if !self.admit(&path, ConflictAction::Edit, NodeKind::File, content)? {
            return Ok(());
        }
        let revision = self.revision()?;
        let entry = entries::entry(self.drive.set, &path, false)?
            .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;

        let content_state = match content {
            Some(text) => self.install_text(&path, &entry, text, revision)?,
            None => NotifyState::Unchanged,
        };
        let prop_state = self.apply_props(&path, props)?;
        entries::modify_entry(self.drive.set, &path, |e| e.revision = Some(revision))?;

        emit(
            self.drive.notify,
            Notification::new(&path, NotifyAction::UpdateUpdate)
                .with_kind(NodeKind::File)
                .with_states(content_state, prop_state)
                .with_revision(Some(revision)),
        );
        Ok(())
    }

    fn close_edit(&mut self) -> Result<EditSummary, WcError> {
        self.drive.cancel.check()?;
        let revision = self.revision()?;
        self.bump(revision)?;
        info!(
            anchor = %self.drive.anchor.display(),
            revision,
            tree_conflicts = self.drive.summary.tree_conflicts,
            skipped = self.drive.summary.skipped,
            "drive completed"
        );
        emit(
            self.drive.notify,
            Notification::new(&self.drive.anchor, NotifyAction::UpdateCompleted)
                .with_kind(NodeKind::Dir)
                .with_revision(Some(revision)),
        );
        Ok(self.drive.summary.clone())
    }
}
