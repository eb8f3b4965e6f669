//! Per-path status classification.
//!
//! A [`StatusRecord`] combines the entry, what is on disk, and modification
//! checks into one text and one property status kind. Precedence for the
//! text status:
//!
//! 1. unversioned and ignored: `none`
//! 2. unversioned and present: `unversioned`
//! 3. scheduled for deletion: `deleted`
//! 4. versioned but absent from disk: `missing`
//! 5. disk kind differs from the entry: `obstructed`
//! 6. interrupted directory: `incomplete`
//! 7. scheduled add / replace: `added` / `replaced`
//! 8. conflict files present: `conflicted`, else `modified` or `normal`

pub mod modified;
mod summary;
mod walk;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use glob_match::glob_match;
use serde::{Deserialize, Serialize};

use crate::conflict::{self, TreeConflictDescriptor};
use crate::entries::{self, Entry, RepoLock, Schedule};
use crate::errors::WcError;
use crate::lock::{self, LockSet};
use crate::models::{join_url, normalize, split_path, NodeKind, Revnum, PROP_IGNORE};

pub use modified::{props_modified, text_modified, tree_modified};
pub use summary::{conflicted, revision_status, Conflicted, RevisionStatus};
pub use walk::{status_walk, RemoteChange, RemoteStatus, StatusOptions};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Status of a node's text or properties.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    #[default]
    None,
    Unversioned,
    Normal,
    Added,
    Missing,
    Deleted,
    Replaced,
    Modified,
    Merged,
    Conflicted,
    Ignored,
    Obstructed,
    External,
    Incomplete,
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Unversioned => "unversioned",
            Self::Normal => "normal",
            Self::Added => "added",
            Self::Missing => "missing",
            Self::Deleted => "deleted",
            Self::Replaced => "replaced",
            Self::Modified => "modified",
            Self::Merged => "merged",
            Self::Conflicted => "conflicted",
            Self::Ignored => "ignored",
            Self::Obstructed => "obstructed",
            Self::External => "external",
            Self::Incomplete => "incomplete",
        };
        write!(f, "{}", s)
    }
}

/// Everything known about one path's local (and optionally remote) state.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub path: PathBuf,
    pub entry: Option<Entry>,
    pub text_status: StatusKind,
    pub prop_status: StatusKind,
    /// The directory holds a write-lock marker.
    pub locked: bool,
    pub copied: bool,
    /// The URL is not the parent's URL plus the node's name.
    pub switched: bool,
    pub tree_conflict: Option<TreeConflictDescriptor>,
    pub url: Option<String>,

    pub repos_text_status: StatusKind,
    pub repos_prop_status: StatusKind,
    pub repos_lock: Option<RepoLock>,
    pub ood_last_cmt_rev: Option<Revnum>,
    pub ood_last_cmt_date: Option<DateTime<Utc>>,
    pub ood_kind: NodeKind,
    pub ood_last_cmt_author: Option<String>,
}

impl StatusRecord {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entry: None,
            text_status: StatusKind::None,
            prop_status: StatusKind::None,
            locked: false,
            copied: false,
            switched: false,
            tree_conflict: None,
            url: None,
            repos_text_status: StatusKind::None,
            repos_prop_status: StatusKind::None,
            repos_lock: None,
            ood_last_cmt_rev: None,
            ood_last_cmt_date: None,
            ood_kind: NodeKind::None,
            ood_last_cmt_author: None,
        }
    }

    /// Worth reporting in a default (non `get_all`) status walk.
    pub fn is_interesting(&self) -> bool {
        let boring = |k: StatusKind| matches!(k, StatusKind::None | StatusKind::Normal);
        !boring(self.text_status)
            || !boring(self.prop_status)
            || self.locked
            || self.switched
            || self.tree_conflict.is_some()
            || self.entry.as_ref().is_some_and(|e| e.lock.is_some())
            || !boring(self.repos_text_status)
            || !boring(self.repos_prop_status)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify `path`; its parent (or the directory itself) must be in `set`.
pub fn status(set: &LockSet, path: &Path) -> Result<StatusRecord, WcError> {
    let path = normalize(path);
    let mut record = StatusRecord::new(&path);
    let disk = NodeKind::on_disk(&path)?;
    record.tree_conflict = conflict::tree_conflict(set, &path)?;

    let Some(entry) = entries::entry(set, &path, false)? else {
        if disk != NodeKind::None {
            record.text_status = if is_ignored(set, &path)? {
                StatusKind::None
            } else {
                StatusKind::Unversioned
            };
        }
        return Ok(record);
    };

    record.text_status = text_status(set, &path, &entry, disk)?;
    record.prop_status = prop_status(set, &path, &entry, disk)?;
    record.copied = entry.copied;
    record.url = entry.url.clone();
    record.switched = is_switched(set, &path, &entry)?;
    if entry.kind == NodeKind::Dir && disk == NodeKind::Dir {
        record.locked = lock::locked(set.config(), &path).unwrap_or(false);
    }
    record.entry = Some(entry);
    Ok(record)
}

fn text_status(
    set: &LockSet,
    path: &Path,
    entry: &Entry,
    disk: NodeKind,
) -> Result<StatusKind, WcError> {
    if entry.schedule == Schedule::Delete {
        return Ok(StatusKind::Deleted);
    }
    if disk == NodeKind::None || (entry.kind == NodeKind::Dir && set.is_missing(path)) {
        return Ok(StatusKind::Missing);
    }
    if disk != entry.kind {
        return Ok(StatusKind::Obstructed);
    }
    if entry.kind == NodeKind::Dir && entry.incomplete {
        return Ok(StatusKind::Incomplete);
    }
    match entry.schedule {
        Schedule::Add => return Ok(StatusKind::Added),
        Schedule::Replace => return Ok(StatusKind::Replaced),
        _ => {}
    }
    if entry.kind == NodeKind::Dir {
        return Ok(StatusKind::Normal);
    }

    let (parent, _) = split_path(path)?;
    let conflict_present = [&entry.conflict_old, &entry.conflict_new, &entry.conflict_wrk]
        .iter()
        .filter_map(|f| f.as_deref())
        .any(|name| parent.join(name).exists());
    if conflict_present {
        return Ok(StatusKind::Conflicted);
    }
    if text_modified(set, path, false)? {
        Ok(StatusKind::Modified)
    } else {
        Ok(StatusKind::Normal)
    }
}

fn prop_status(
    set: &LockSet,
    path: &Path,
    entry: &Entry,
    disk: NodeKind,
) -> Result<StatusKind, WcError> {
    if disk == NodeKind::None || entry.schedule == Schedule::Delete {
        return Ok(StatusKind::None);
    }
    if let Some(prej) = &entry.prejfile {
        let dir = if entry.kind == NodeKind::Dir {
            path.to_path_buf()
        } else {
            split_path(path)?.0
        };
        if dir.join(prej).exists() {
            return Ok(StatusKind::Conflicted);
        }
    }
    let props = entries::node_props(set, path)?;
    if props.is_modified() {
        Ok(StatusKind::Modified)
    } else if props.working.is_empty() {
        Ok(StatusKind::None)
    } else {
        Ok(StatusKind::Normal)
    }
}

fn is_switched(set: &LockSet, path: &Path, entry: &Entry) -> Result<bool, WcError> {
    if matches!(entry.schedule, Schedule::Add | Schedule::Replace) || entry.copied {
        return Ok(false);
    }
    let Some(url) = entry.url.as_deref() else {
        return Ok(false);
    };
    let (parent, name) = split_path(path)?;
    let Ok(parent_id) = set.retrieve(&parent) else {
        return Ok(false);
    };
    let parent_url = entries::entry_in(set, parent_id, "", true)?.and_then(|e| e.url);
    Ok(parent_url.is_some_and(|p| join_url(&p, &name) != url))
}

/// Whether an unversioned `path` matches the global or directory ignores.
pub fn is_ignored(set: &LockSet, path: &Path) -> Result<bool, WcError> {
    let (parent, name) = split_path(path)?;
    if set.config().is_adm_dir(&name) {
        return Ok(true);
    }
    if set
        .config()
        .status
        .global_ignores
        .iter()
        .any(|pattern| glob_match(pattern, &name))
    {
        return Ok(true);
    }
    let dir_props = match entries::node_props(set, &parent) {
        Ok(p) => p,
        Err(WcError::NotDirectory(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    Ok(dir_props
        .working
        .get(PROP_IGNORE)
        .map(|patterns| {
            patterns
                .lines()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .any(|pattern| glob_match(pattern, &name))
        })
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adm::props::NodeProps;
    use crate::cancel::CancellationToken;
    use crate::lock::{LockDepth, LockMode};
    use crate::testutil::{checkout, Node};

    fn open(wc: &crate::testutil::TestWc, mode: LockMode) -> LockSet {
        let cancel = CancellationToken::new();
        LockSet::open(&wc.config, &wc.root, mode, LockDepth::INFINITE, &cancel)
            .unwrap()
            .0
    }

    #[test]
    fn test_normal_and_modified() {
        let wc = checkout(&[Node::file("a.txt", "a\n"), Node::file("b.txt", "b\n")]);
        std::fs::write(wc.root.join("b.txt"), "b changed\n").unwrap();
        let set = open(&wc, LockMode::Read);
        assert_eq!(status(&set, &wc.root.join("a.txt")).unwrap().text_status, StatusKind::Normal);
        assert_eq!(status(&set, &wc.root.join("b.txt")).unwrap().text_status, StatusKind::Modified);
    }

    #[test]
    fn test_unversioned_and_ignored() {
        let wc = checkout(&[]);
        std::fs::write(wc.root.join("new.txt"), "n").unwrap();
        std::fs::write(wc.root.join("junk.o"), "o").unwrap();
        let set = open(&wc, LockMode::Read);
        assert_eq!(
            status(&set, &wc.root.join("new.txt")).unwrap().text_status,
            StatusKind::Unversioned
        );
        assert_eq!(status(&set, &wc.root.join("junk.o")).unwrap().text_status, StatusKind::None);
        assert_eq!(status(&set, &wc.root.join("absent")).unwrap().text_status, StatusKind::None);
    }

    #[test]
    fn test_svn_ignore_property() {
        let wc = checkout(&[]);
        std::fs::write(wc.root.join("build.log"), "x").unwrap();
        let mut set = open(&wc, LockMode::Write);
        let mut props = NodeProps::default();
        props.working.insert(PROP_IGNORE.into(), "*.log\n".into());
        entries::write_node_props(&mut set, &wc.root, props).unwrap();
        assert!(is_ignored(&set, &wc.root.join("build.log")).unwrap());
    }

    #[test]
    fn test_missing_and_obstructed() {
        let wc = checkout(&[Node::file("a.txt", "a\n"), Node::file("b.txt", "b\n")]);
        std::fs::remove_file(wc.root.join("a.txt")).unwrap();
        std::fs::remove_file(wc.root.join("b.txt")).unwrap();
        std::fs::create_dir(wc.root.join("b.txt")).unwrap();
        let set = open(&wc, LockMode::Read);
        assert_eq!(status(&set, &wc.root.join("a.txt")).unwrap().text_status, StatusKind::Missing);
        assert_eq!(
            status(&set, &wc.root.join("b.txt")).unwrap().text_status,
            StatusKind::Obstructed
        );
    }

    #[test]
    fn test_schedule_statuses() {
        let wc = checkout(&[Node::file("a.txt", "a\n"), Node::file("b.txt", "b\n")]);
        let mut set = open(&wc, LockMode::Write);
        entries::modify_entry(&mut set, &wc.root.join("a.txt"), |e| e.schedule = Schedule::Delete)
            .unwrap();
        entries::modify_entry(&mut set, &wc.root.join("b.txt"), |e| e.schedule = Schedule::Replace)
            .unwrap();
        assert_eq!(status(&set, &wc.root.join("a.txt")).unwrap().text_status, StatusKind::Deleted);
        assert_eq!(status(&set, &wc.root.join("b.txt")).unwrap().text_status, StatusKind::Replaced);
    }

    #[test]
    fn test_conflicted_while_backups_exist() {
        let wc = checkout(&[Node::file("a.txt", "a\n")]);
        let mut set = open(&wc, LockMode::Write);
        std::fs::write(wc.root.join("a.txt.mine"), "m").unwrap();
        entries::modify_entry(&mut set, &wc.root.join("a.txt"), |e| {
            e.conflict_wrk = Some("a.txt.mine".into())
        })
        .unwrap();
        assert_eq!(
            status(&set, &wc.root.join("a.txt")).unwrap().text_status,
            StatusKind::Conflicted
        );
        std::fs::remove_file(wc.root.join("a.txt.mine")).unwrap();
        assert_eq!(status(&set, &wc.root.join("a.txt")).unwrap().text_status, StatusKind::Normal);
    }

    #[test]
    fn test_switched_and_locked_directory() {
        let wc = checkout(&[Node::dir("sub")]);
        let mut set = open(&wc, LockMode::Write);
        entries::modify_entry(&mut set, &wc.root.join("sub"), |e| {
            e.url = Some("http://svn.example.com/repo/branches/x".into())
        })
        .unwrap();
        let record = status(&set, &wc.root.join("sub")).unwrap();
        assert!(record.switched);
        assert!(record.locked);
        assert!(record.is_interesting());
    }
}
