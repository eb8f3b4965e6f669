//! Persistence of a directory's entry table.
//!
//! The table and the tree-conflict records of the directory's children are
//! one JSON document, replaced atomically on every write.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AdmPaths, FORMAT};
use crate::conflict::TreeConflictDescriptor;
use crate::entries::Entry;
use crate::errors::WcError;

/// In-memory image of `<adm>/entries`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntriesFile {
    pub format: u32,
    /// Entries keyed by name; the directory itself lives under `""`.
    pub entries: BTreeMap<String, Entry>,
    /// Tree-conflict records keyed by victim name.
    #[serde(default)]
    pub tree_conflicts: BTreeMap<String, TreeConflictDescriptor>,
}

impl EntriesFile {
    pub fn new() -> Self {
        Self {
            format: FORMAT,
            entries: BTreeMap::new(),
            tree_conflicts: BTreeMap::new(),
        }
    }
}

impl Default for EntriesFile {
    fn default() -> Self {
        Self::new()
    }
}

pub fn read_entries_file(adm: &AdmPaths) -> Result<EntriesFile, WcError> {
    read_json(adm, &adm.entries_file())
}

pub fn write_entries_file(adm: &AdmPaths, file: &EntriesFile) -> Result<(), WcError> {
    debug!(dir = %adm.wc_dir().display(), count = file.entries.len(), "writing entries");
    write_json_atomic(adm, &adm.entries_file(), file)
}

pub(crate) fn read_json<T: DeserializeOwned>(adm: &AdmPaths, path: &Path) -> Result<T, WcError> {
    let raw = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => WcError::NotDirectory(adm.wc_dir().to_path_buf()),
        _ => WcError::Io(e),
    })?;
    serde_json::from_slice(&raw).map_err(|e| WcError::AdmCorrupt {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Serialize `value` into the area's tmp directory, then rename over `path`.
pub(crate) fn write_json_atomic<T: Serialize>(
    adm: &AdmPaths,
    path: &Path,
    value: &T,
) -> Result<(), WcError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| WcError::AdmCorrupt {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let tmp_dir = adm.tmp_dir();
    std::fs::create_dir_all(&tmp_dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&tmp_dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| WcError::Io(e.error))?;
    Ok(())
}
