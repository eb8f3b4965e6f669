//! Reading and writing entries and node properties through a lock set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::Entry;
use crate::adm::props::{self, NodeProps};
use crate::adm::{self, store, AdmPaths, EntriesFile};
use crate::errors::WcError;
use crate::lock::{HandleId, LockSet};
use crate::models::{normalize, split_path, THIS_DIR};

/// The entry of `path`, or `None` when it is not versioned.
///
/// A directory open in the set answers with its full self entry; anything
/// else is looked up in its parent's table. Hidden entries are omitted
/// unless `show_hidden`.
pub fn entry(set: &LockSet, path: &Path, show_hidden: bool) -> Result<Option<Entry>, WcError> {
    let path = normalize(path);
    if let Ok(id) = set.retrieve(&path) {
        return entry_in(set, id, THIS_DIR, show_hidden);
    }
    let (parent, name) = split_path(&path)?;
    let parent_id = set
        .retrieve(&parent)
        .map_err(|_| WcError::NotLocked(path.clone()))?;
    entry_in(set, parent_id, &name, show_hidden)
}

/// The entry `name` of the open directory `dir`.
pub fn entry_in(
    set: &LockSet,
    dir: HandleId,
    name: &str,
    show_hidden: bool,
) -> Result<Option<Entry>, WcError> {
    let file = set.entries_file(dir)?;
    Ok(file
        .entries
        .get(name)
        .filter(|e| show_hidden || !e.is_hidden())
        .cloned())
}

/// All entries of the open directory `dir`, self entry included.
pub fn entries_read(
    set: &LockSet,
    dir: HandleId,
    show_hidden: bool,
) -> Result<BTreeMap<String, Entry>, WcError> {
    let file = set.entries_file(dir)?;
    Ok(file
        .entries
        .iter()
        .filter(|(_, e)| show_hidden || !e.is_hidden())
        .map(|(k, e)| (k.clone(), e.clone()))
        .collect())
}

/// The entry table of `dir`: cached when open in the set, else read from disk.
pub fn dir_entries(set: &LockSet, dir: &Path) -> Result<EntriesFile, WcError> {
    if let Ok(id) = set.retrieve(dir) {
        return Ok(set.entries_file(id)?.clone());
    }
    if adm::check_wc(set.config(), dir)?.is_none() {
        return Err(WcError::NotDirectory(dir.to_path_buf()));
    }
    store::read_entries_file(&AdmPaths::new(set.config(), dir))
}

/// Apply `f` to the entry of `path` and write it back.
///
/// For a directory both the self entry and the parent's stub are updated
/// when their handles are write-locked in the set.
pub fn modify_entry<F>(set: &mut LockSet, path: &Path, mut f: F) -> Result<(), WcError>
where
    F: FnMut(&mut Entry),
{
    let path = normalize(path);
    let mut touched = false;

    if let Ok(dir_id) = set.retrieve(&path) {
        set.modify_entries(dir_id, |file| {
            let e = file
                .entries
                .get_mut(THIS_DIR)
                .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
            f(e);
            Ok(())
        })?;
        touched = true;
    }

    let (parent, name) = split_path(&path)?;
    if let Ok(parent_id) = set.retrieve(&parent) {
        let has_entry = set.entries_file(parent_id)?.entries.contains_key(&name);
        if touched {
            if has_entry && set.is_locked(parent_id) {
                set.modify_entries(parent_id, |file| {
                    if let Some(stub) = file.entries.get_mut(&name) {
                        f(stub);
                    }
                    Ok(())
                })?;
            }
        } else {
            if !has_entry {
                return Err(WcError::EntryNotFound(path));
            }
            set.modify_entries(parent_id, |file| {
                if let Some(e) = file.entries.get_mut(&name) {
                    f(e);
                }
                Ok(())
            })?;
            touched = true;
        }
    }

    if !touched {
        return Err(WcError::NotLocked(path));
    }
    debug!(path = %path.display(), "entry modified");
    Ok(())
}

/// Insert or replace `entry` in the open directory `dir`.
pub fn write_entry(set: &mut LockSet, dir: HandleId, entry: Entry) -> Result<(), WcError> {
    set.modify_entries(dir, |file| {
        file.entries.insert(entry.name.clone(), entry);
        Ok(())
    })
}

/// Remove entry `name` (and its properties) from the open directory `dir`.
pub fn remove_entry(set: &mut LockSet, dir: HandleId, name: &str) -> Result<Option<Entry>, WcError> {
    let removed = set.modify_entries(dir, |file| Ok(file.entries.remove(name)))?;
    set.modify_props(dir, |table| {
        table.remove(name);
        Ok(())
    })?;
    Ok(removed)
}

/// Record the working file's timestamp and size on its entry.
///
/// Only valid when the working text equals the pristine: the stamp is what
/// lets `text_modified` skip reading an unchanged file.
pub fn stamp(set: &mut LockSet, path: &Path) -> Result<(), WcError> {
    let meta = std::fs::metadata(path)?;
    let time = DateTime::<Utc>::from(meta.modified()?);
    let size = meta.len();
    modify_entry(set, path, |e| {
        e.text_time = Some(time);
        e.working_size = Some(size);
    })
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Directory and key under which the properties of `path` are stored.
pub fn props_location(set: &LockSet, path: &Path) -> Result<(PathBuf, String), WcError> {
    let path = normalize(path);
    if set.retrieve(&path).is_ok()
        || (path.is_dir() && adm::check_wc(set.config(), &path)?.is_some())
    {
        return Ok((path, THIS_DIR.to_string()));
    }
    split_path(&path)
}

/// Base and working properties of `path`.
pub fn node_props(set: &LockSet, path: &Path) -> Result<NodeProps, WcError> {
    let (dir, key) = props_location(set, path)?;
    let adm_paths = match set.retrieve(&dir) {
        Ok(id) => set.adm(id),
        Err(_) => AdmPaths::new(set.config(), &dir),
    };
    Ok(props::read_props(&adm_paths)?
        .remove(&key)
        .unwrap_or_default())
}

/// Replace the properties of `path` and refresh the entry's property flags.
pub fn write_node_props(set: &mut LockSet, path: &Path, node: NodeProps) -> Result<(), WcError> {
    let (dir, key) = props_location(set, path)?;
    let id = set.retrieve(&dir)?;
    let has_props = !node.working.is_empty();
    let has_mods = node.is_modified();
    set.modify_props(id, |table| {
        if node.base.is_empty() && node.working.is_empty() {
            table.remove(&key);
        } else {
            table.insert(key.clone(), node);
        }
        Ok(())
    })?;
    match modify_entry(set, path, |e| {
        e.has_props = has_props;
        e.has_prop_mods = has_mods;
    }) {
        Ok(()) | Err(WcError::EntryNotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
