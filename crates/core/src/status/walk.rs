//! Depth-first status traversal, optionally merged with repository state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{is_ignored, status, StatusKind, StatusRecord};
use crate::cancel::CancellationToken;
use crate::conflict::tree_conflicts_in;
use crate::entries::{self, RepoLock};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, Depth, NodeKind, Revnum};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction};

/// Knobs of a status walk.
#[derive(Debug, Clone, Copy)]
pub struct StatusOptions {
    pub depth: Depth,
    /// Report unmodified nodes too.
    pub get_all: bool,
    /// Report ignored nodes (as `ignored`) instead of hiding them.
    pub no_ignore: bool,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self {
            depth: Depth::Infinity,
            get_all: false,
            no_ignore: false,
        }
    }
}

/// What the repository reports for one path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteChange {
    pub text_status: StatusKind,
    pub prop_status: StatusKind,
    pub lock: Option<RepoLock>,
    pub last_cmt_rev: Option<Revnum>,
    pub last_cmt_date: Option<DateTime<Utc>>,
    pub last_cmt_author: Option<String>,
    pub kind: NodeKind,
}

/// Repository-side changes keyed by absolute working-copy path.
pub type RemoteStatus = BTreeMap<PathBuf, RemoteChange>;

/// Report the status of `path` and, for directories, everything below it
/// to `opts.depth`. A directory is reported before its children.
///
/// Returns the youngest revision reported by `remote`, if any, after
/// notifying `StatusCompleted`.
pub fn status_walk<F>(
    set: &LockSet,
    path: &Path,
    opts: &StatusOptions,
    remote: Option<&RemoteStatus>,
    cancel: &CancellationToken,
    notify: &dyn NotificationSink,
    mut report: F,
) -> Result<Option<Revnum>, WcError>
where
    F: FnMut(StatusRecord) -> Result<(), WcError>,
{
    let path = normalize(path);
    let mut walker = Walker {
        set,
        opts,
        remote,
        cancel,
        report: &mut report,
    };
    walker.visit(&path, opts.depth, true)?;

    let youngest = remote.and_then(|r| r.values().filter_map(|c| c.last_cmt_rev).max());
    emit(
        notify,
        Notification::new(&path, NotifyAction::StatusCompleted).with_revision(youngest),
    );
    Ok(youngest)
}

struct Walker<'a, F> {
    set: &'a LockSet,
    opts: &'a StatusOptions,
    remote: Option<&'a RemoteStatus>,
    cancel: &'a CancellationToken,
    report: &'a mut F,
}

impl<'a, F> Walker<'a, F>
where
    F: FnMut(StatusRecord) -> Result<(), WcError>,
{
    fn visit(&mut self, path: &Path, depth: Depth, is_target: bool) -> Result<(), WcError> {
        self.cancel.check()?;
        let mut record = status(self.set, path)?;
        self.apply_remote(&mut record);

        let descend = record.entry.as_ref().is_some_and(|e| e.kind == NodeKind::Dir)
            && self.set.retrieve(path).is_ok();

        if is_target || self.opts.get_all || record.is_interesting() {
            (self.report)(record)?;
        }
        if descend {
            self.visit_children(path, depth)?;
        }
        Ok(())
    }

    fn visit_children(&mut self, dir: &Path, depth: Depth) -> Result<(), WcError> {
        let id = self.set.retrieve(dir)?;
        let versioned = entries::entries_read(self.set, id, false)?;

        let mut names: BTreeSet<String> = versioned
            .keys()
            .filter(|name| !name.is_empty())
            .cloned()
            .collect();
        for item in std::fs::read_dir(dir)? {
            let name = item?.file_name().to_string_lossy().into_owned();
            if !self.set.config().is_adm_dir(&name) {
                names.insert(name);
            }
        }
        // Victims may have neither an entry nor a node on disk.
        for desc in tree_conflicts_in(self.set, id)? {
            names.insert(desc.victim);
        }

        for name in names {
            let child = dir.join(&name);
            match versioned.get(&name) {
                Some(entry) if entry.kind == NodeKind::Dir => {
                    if depth.includes_dirs() {
                        self.visit(&child, depth.descend(), false)?;
                    }
                }
                Some(_) => {
                    if depth.includes_files() {
                        self.visit(&child, depth, false)?;
                    }
                }
                None => self.visit_unversioned(&child, depth)?,
            }
        }

        self.report_remote_additions(dir)?;
        Ok(())
    }

    fn visit_unversioned(&mut self, path: &Path, depth: Depth) -> Result<(), WcError> {
        self.cancel.check()?;
        let mut record = status(self.set, path)?;
        let disk = NodeKind::on_disk(path)?;
        let kind = match disk {
            NodeKind::None => record
                .tree_conflict
                .as_ref()
                .map_or(NodeKind::None, |desc| desc.node_kind),
            kind => kind,
        };
        let wanted = match kind {
            NodeKind::Dir => depth.includes_dirs(),
            _ => depth.includes_files(),
        };
        if !wanted {
            return Ok(());
        }
        if record.text_status == StatusKind::None && disk != NodeKind::None {
            if !self.opts.no_ignore {
                debug!(path = %path.display(), "ignored");
                return Ok(());
            }
            record.text_status = StatusKind::Ignored;
        }
        self.apply_remote(&mut record);
        (self.report)(record)
    }

    /// Paths the repository added that have no local counterpart.
    fn report_remote_additions(&mut self, dir: &Path) -> Result<(), WcError> {
        let Some(remote) = self.remote else {
            return Ok(());
        };
        let additions: Vec<(PathBuf, RemoteChange)> = remote
            .iter()
            .filter(|(p, c)| {
                p.parent() == Some(dir)
                    && c.text_status == StatusKind::Added
                    && NodeKind::on_disk(p).map(|k| k == NodeKind::None).unwrap_or(false)
            })
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        for (path, change) in additions {
            if is_ignored(self.set, &path)? && !self.opts.no_ignore {
                continue;
            }
            let mut record = status(self.set, &path)?;
            if record.entry.is_some() || record.tree_conflict.is_some() {
                continue;
            }
            fill_remote(&mut record, &change);
            (self.report)(record)?;
        }
        Ok(())
    }

    fn apply_remote(&self, record: &mut StatusRecord) {
        if let Some(change) = self.remote.and_then(|r| r.get(&record.path)) {
            fill_remote(record, change);
        }
    }
}

fn fill_remote(record: &mut StatusRecord, change: &RemoteChange) {
    record.repos_text_status = change.text_status;
    record.repos_prop_status = change.prop_status;
    record.repos_lock = change.lock.clone();
    record.ood_last_cmt_rev = change.last_cmt_rev;
    record.ood_last_cmt_date = change.last_cmt_date;
    record.ood_last_cmt_author = change.last_cmt_author.clone();
    record.ood_kind = change.kind;
}
