//! Versioned-node metadata.
//!
//! Every versioned path has an [`Entry`] in its parent directory's table; a
//! directory additionally keeps its full record under the reserved name `""`
//! in its own table, while the parent only holds a stub (kind, schedule and
//! the hidden flags). Entries handed out are clones: changing one means
//! writing it back through [`modify_entry`] or [`write_entry`].

mod access;
mod walk;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Depth, NodeKind, Revnum};

pub use access::{
    dir_entries, entries_read, entry, entry_in, modify_entry, node_props, props_location,
    remove_entry, stamp, write_entry, write_node_props,
};
pub use walk::walk_entries;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Pending local intent for a node, applied on the next commit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Normal,
    Add,
    Delete,
    Replace,
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Add => write!(f, "add"),
            Self::Delete => write!(f, "delete"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

/// A repository lock held on a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoLock {
    pub token: String,
    pub owner: String,
    pub comment: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
}

/// Versioning metadata of one path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Entry {
    pub name: String,
    pub kind: NodeKind,
    pub schedule: Schedule,
    pub revision: Option<Revnum>,
    pub url: Option<String>,
    /// Repository root URL.
    pub repos: Option<String>,
    pub uuid: Option<String>,

    pub copied: bool,
    /// Deleted in the repository at `revision`, kept as a placeholder.
    pub deleted: bool,
    /// Excluded by the server (authorization).
    pub absent: bool,
    /// A directory whose update was interrupted.
    pub incomplete: bool,

    pub copyfrom_url: Option<String>,
    pub copyfrom_rev: Option<Revnum>,

    /// Backup file names of a text conflict, relative to the parent dir.
    pub conflict_old: Option<String>,
    pub conflict_new: Option<String>,
    pub conflict_wrk: Option<String>,
    /// Property reject file name, relative to the parent dir.
    pub prejfile: Option<String>,

    pub text_time: Option<DateTime<Utc>>,
    pub prop_time: Option<DateTime<Utc>>,
    /// sha256 of the pristine text.
    pub checksum: Option<String>,
    pub working_size: Option<u64>,

    pub cmt_rev: Option<Revnum>,
    pub cmt_date: Option<DateTime<Utc>>,
    pub cmt_author: Option<String>,

    pub lock: Option<RepoLock>,

    pub has_props: bool,
    pub has_prop_mods: bool,

    pub changelist: Option<String>,
    /// Keep the working directory on disk when its deletion is committed.
    pub keep_local: bool,
    /// Recorded depth of a directory (self entry only).
    pub depth: Depth,
}

impl Entry {
    /// A new entry named `name` of the given kind.
    pub fn new(name: &str, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            ..Self::default()
        }
    }

    /// Hidden entries are placeholders that do not exist locally.
    pub fn is_hidden(&self) -> bool {
        (self.deleted || self.absent) && !matches!(self.schedule, Schedule::Add | Schedule::Replace)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    pub fn has_text_conflict(&self) -> bool {
        self.conflict_old.is_some() || self.conflict_new.is_some() || self.conflict_wrk.is_some()
    }

    pub fn has_prop_conflict(&self) -> bool {
        self.prejfile.is_some()
    }

    /// The parts of a directory record that its parent keeps.
    pub fn stub(&self, name: &str) -> Entry {
        Entry {
            name: name.to_string(),
            kind: NodeKind::Dir,
            schedule: self.schedule,
            revision: self.revision,
            deleted: self.deleted,
            absent: self.absent,
            incomplete: self.incomplete,
            ..Entry::default()
        }
    }
}
