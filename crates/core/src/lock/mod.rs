//! Hierarchical directory locking.
//!
//! A [`LockSet`] is the arena owning every directory lock handle opened
//! together; handles are addressed by [`HandleId`]. The set also caches each
//! open directory's entry table for the lifetime of the handle. Write locks
//! are physical marker files created with exclusive-create semantics, so at
//! most one write handle per directory can exist at a time, across sets and
//! across processes.

mod cleanup;
mod probe;

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::adm::props::{self, PropsTable};
use crate::adm::{self, store, AdmPaths, EntriesFile};
use crate::cancel::CancellationToken;
use crate::config::WcConfig;
use crate::errors::WcError;
use crate::models::{normalize, NodeKind, THIS_DIR};

pub use cleanup::cleanup;
pub use probe::Anchor;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Index of a handle inside its [`LockSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(usize);

/// Access requested for a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Levels below a directory to lock: 0 the directory only, negative
/// unbounded, N that many levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockDepth(i32);

impl LockDepth {
    pub const THIS_DIR: LockDepth = LockDepth(0);
    pub const INFINITE: LockDepth = LockDepth(-1);

    pub fn levels(n: i32) -> Self {
        LockDepth(n)
    }

    fn descend(self) -> Option<LockDepth> {
        match self.0 {
            0 => None,
            n if n < 0 => Some(self),
            n => Some(LockDepth(n - 1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Open,
    /// A versioned subdirectory absent from disk; skipped while locking.
    Missing,
    Closed,
}

#[derive(Debug)]
struct Slot {
    path: PathBuf,
    mode: LockMode,
    state: SlotState,
    parent: Option<HandleId>,
    entries: Option<EntriesFile>,
    needs_cleanup: bool,
}

// ---------------------------------------------------------------------------
// Lock set
// ---------------------------------------------------------------------------

/// Arena of directory lock handles opened as one unit.
///
/// Dropping the set closes every handle still open, except that a write
/// handle flagged with [`LockSet::set_needs_cleanup`] keeps its marker so an
/// interrupted operation is recovered by [`cleanup`].
#[derive(Debug)]
pub struct LockSet {
    config: WcConfig,
    slots: Vec<Slot>,
    index: HashMap<PathBuf, HandleId>,
    root: Option<HandleId>,
}

impl LockSet {
    /// An empty set using `config` for every directory it opens.
    pub fn new(config: &WcConfig) -> Self {
        Self {
            config: config.clone(),
            slots: Vec::new(),
            index: HashMap::new(),
            root: None,
        }
    }

    /// Open `path` as the root of a new set.
    pub fn open(
        config: &WcConfig,
        path: &Path,
        mode: LockMode,
        depth: LockDepth,
        cancel: &CancellationToken,
    ) -> Result<(LockSet, HandleId), WcError> {
        let mut set = LockSet::new(config);
        let id = set.open_in(path, mode, depth, cancel)?;
        Ok((set, id))
    }

    /// Open `path` into this set, locking `depth` levels of versioned
    /// subdirectories below it.
    ///
    /// Either every requested directory is opened or none is; versioned
    /// subdirectories missing from disk are recorded as missing and skipped.
    pub fn open_in(
        &mut self,
        path: &Path,
        mode: LockMode,
        depth: LockDepth,
        cancel: &CancellationToken,
    ) -> Result<HandleId, WcError> {
        let path = normalize(path);
        let parent = path
            .parent()
            .and_then(|p| self.index.get(p).copied())
            .filter(|id| self.slots[id.0].state == SlotState::Open);

        let mut acquired = Vec::new();
        match self.open_tree(&path, parent, mode, depth, cancel, &mut acquired) {
            Ok(id) => {
                if self.root.is_none() {
                    self.root = Some(id);
                }
                info!(path = %path.display(), mode = %mode, handles = acquired.len(), "opened lock set");
                Ok(id)
            }
            Err(e) => {
                for id in acquired.into_iter().rev() {
                    self.release(id);
                }
                debug!(path = %path.display(), error = %e, "lock acquisition rolled back");
                Err(e)
            }
        }
    }

    fn open_tree(
        &mut self,
        path: &Path,
        parent: Option<HandleId>,
        mode: LockMode,
        depth: LockDepth,
        cancel: &CancellationToken,
        acquired: &mut Vec<HandleId>,
    ) -> Result<HandleId, WcError> {
        cancel.check()?;

        if let Some(&existing) = self.index.get(path) {
            let slot = &self.slots[existing.0];
            if slot.state == SlotState::Open {
                if slot.mode == LockMode::Write || mode == LockMode::Write {
                    return Err(WcError::Locked(path.to_path_buf()));
                }
                return Ok(existing);
            }
        }

        if adm::check_wc(&self.config, path)?.is_none() {
            return Err(WcError::NotDirectory(path.to_path_buf()));
        }
        let adm_paths = AdmPaths::new(&self.config, path);

        if mode == LockMode::Write {
            create_marker(&adm_paths)?;
        }
        let entries = match store::read_entries_file(&adm_paths) {
            Ok(entries) => entries,
            Err(e) => {
                if mode == LockMode::Write {
                    remove_marker(&adm_paths);
                }
                return Err(e);
            }
        };

        let id = self.push_slot(Slot {
            path: path.to_path_buf(),
            mode,
            state: SlotState::Open,
            parent,
            entries: Some(entries),
            needs_cleanup: false,
        });
        acquired.push(id);
        debug!(path = %path.display(), mode = %mode, "directory locked");

        let Some(child_depth) = depth.descend() else {
            return Ok(id);
        };

        let subdirs: Vec<String> = self.slots[id.0]
            .entries
            .as_ref()
            .map(|file| {
                file.entries
                    .values()
                    .filter(|e| e.name != THIS_DIR && e.kind == NodeKind::Dir && !e.is_hidden())
                    .map(|e| e.name.clone())
                    .collect()
            })
            .unwrap_or_default();

        for name in subdirs {
            let child = path.join(&name);
            let present = child.is_dir() && adm::check_wc(&self.config, &child)?.is_some();
            if !present {
                debug!(path = %child.display(), "versioned subdirectory missing, skipped");
                let missing = self.push_slot(Slot {
                    path: child,
                    mode,
                    state: SlotState::Missing,
                    parent: Some(id),
                    entries: None,
                    needs_cleanup: false,
                });
                acquired.push(missing);
                continue;
            }
            self.open_tree(&child, Some(id), mode, child_depth, cancel, acquired)?;
        }

        Ok(id)
    }

    fn push_slot(&mut self, slot: Slot) -> HandleId {
        let id = HandleId(self.slots.len());
        self.index.insert(slot.path.clone(), id);
        self.slots.push(slot);
        id
    }

    /// Drop a slot, removing its marker if it holds one.
    fn release(&mut self, id: HandleId) {
        let slot = &mut self.slots[id.0];
        if slot.state == SlotState::Open && slot.mode == LockMode::Write {
            remove_marker(&AdmPaths::new(&self.config, &slot.path));
        }
        slot.state = SlotState::Closed;
        slot.entries = None;
        if self.index.get(&slot.path) == Some(&id) {
            self.index.remove(&slot.path);
        }
        if self.root == Some(id) {
            self.root = None;
        }
    }

    /// Look up the open handle for `path`.
    pub fn retrieve(&self, path: &Path) -> Result<HandleId, WcError> {
        let path = normalize(path);
        match self.index.get(&path) {
            Some(&id) if self.slots[id.0].state == SlotState::Open => Ok(id),
            _ => Err(WcError::NotLocked(path)),
        }
    }

    /// Close `id`, first closing its direct children in this set.
    ///
    /// The marker is removed unconditionally, even when the handle was
    /// flagged as needing cleanup.
    pub fn close(&mut self, id: HandleId) -> Result<(), WcError> {
        let children: Vec<HandleId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.parent == Some(id) && s.state != SlotState::Closed)
            .map(|(i, _)| HandleId(i))
            .collect();
        for child in children {
            self.close(child)?;
        }

        let slot = &self.slots[id.0];
        if slot.state == SlotState::Closed {
            return Ok(());
        }
        debug!(path = %slot.path.display(), "closing lock handle");
        if slot.state == SlotState::Open && slot.mode == LockMode::Write {
            let adm_paths = AdmPaths::new(&self.config, &slot.path);
            match std::fs::remove_file(adm_paths.lock_file()) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.forget(id);
        Ok(())
    }

    /// Mark `id` closed without touching the disk.
    pub(crate) fn forget(&mut self, id: HandleId) {
        let slot = &mut self.slots[id.0];
        slot.state = SlotState::Closed;
        slot.entries = None;
        slot.needs_cleanup = false;
        if self.index.get(&slot.path) == Some(&id) {
            self.index.remove(&slot.path);
        }
        if self.root == Some(id) {
            self.root = None;
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &WcConfig {
        &self.config
    }

    /// The handle that opened the set.
    pub fn root(&self) -> Option<HandleId> {
        self.root
    }

    pub fn path(&self, id: HandleId) -> &Path {
        &self.slots[id.0].path
    }

    pub fn mode(&self, id: HandleId) -> LockMode {
        self.slots[id.0].mode
    }

    pub fn is_open(&self, id: HandleId) -> bool {
        self.slots[id.0].state == SlotState::Open
    }

    /// Whether `path` was recorded as a missing subdirectory while locking.
    pub fn is_missing(&self, path: &Path) -> bool {
        self.index
            .get(&normalize(path))
            .is_some_and(|id| self.slots[id.0].state == SlotState::Missing)
    }

    /// Cheap check that `id` is an open write handle; no disk access.
    pub fn is_locked(&self, id: HandleId) -> bool {
        let slot = &self.slots[id.0];
        slot.state == SlotState::Open && slot.mode == LockMode::Write
    }

    /// Open handles in the order they were acquired.
    pub fn handles(&self) -> impl Iterator<Item = HandleId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == SlotState::Open)
            .map(|(i, _)| HandleId(i))
    }

    pub fn needs_cleanup(&self, id: HandleId) -> bool {
        self.slots[id.0].needs_cleanup
    }

    /// Flag (or unflag) a handle whose directory is mid-modification.
    pub fn set_needs_cleanup(&mut self, id: HandleId, value: bool) {
        self.slots[id.0].needs_cleanup = value;
    }

    pub(crate) fn clear_needs_cleanup(&mut self) {
        for slot in &mut self.slots {
            slot.needs_cleanup = false;
        }
    }

    pub(crate) fn adm(&self, id: HandleId) -> AdmPaths {
        AdmPaths::new(&self.config, &self.slots[id.0].path)
    }

    pub(crate) fn require_write(&self, id: HandleId) -> Result<(), WcError> {
        if self.is_locked(id) {
            Ok(())
        } else {
            Err(WcError::NotLocked(self.slots[id.0].path.clone()))
        }
    }

    // -----------------------------------------------------------------------
    // Cached entry tables
    // -----------------------------------------------------------------------

    /// The cached entry table of an open handle.
    pub(crate) fn entries_file(&self, id: HandleId) -> Result<&EntriesFile, WcError> {
        let slot = &self.slots[id.0];
        match (&slot.state, &slot.entries) {
            (SlotState::Open, Some(file)) => Ok(file),
            _ => Err(WcError::NotLocked(slot.path.clone())),
        }
    }

    /// Apply `f` to a copy of the table, persist it, then adopt it.
    ///
    /// A failing `f` leaves both the cache and the disk untouched.
    pub(crate) fn modify_entries<T, F>(&mut self, id: HandleId, f: F) -> Result<T, WcError>
    where
        F: FnOnce(&mut EntriesFile) -> Result<T, WcError>,
    {
        self.require_write(id)?;
        let adm_paths = self.adm(id);
        let mut draft = self.entries_file(id)?.clone();
        let out = f(&mut draft)?;
        store::write_entries_file(&adm_paths, &draft)?;
        self.slots[id.0].entries = Some(draft);
        Ok(out)
    }

    /// Read-modify-write of the directory's property table.
    pub(crate) fn modify_props<T, F>(&mut self, id: HandleId, f: F) -> Result<T, WcError>
    where
        F: FnOnce(&mut PropsTable) -> Result<T, WcError>,
    {
        self.require_write(id)?;
        let adm_paths = self.adm(id);
        let mut table = props::read_props(&adm_paths)?;
        let out = f(&mut table)?;
        props::write_props(&adm_paths, &table)?;
        Ok(out)
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        for slot in &self.slots {
            if slot.state != SlotState::Open || slot.mode != LockMode::Write {
                continue;
            }
            if slot.needs_cleanup {
                warn!(path = %slot.path.display(), "leaving lock in place, cleanup required");
                continue;
            }
            remove_marker(&AdmPaths::new(&self.config, &slot.path));
        }
    }
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

fn create_marker(adm_paths: &AdmPaths) -> Result<(), WcError> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(adm_paths.lock_file())
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(WcError::Locked(adm_paths.wc_dir().to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn remove_marker(adm_paths: &AdmPaths) {
    if let Err(e) = std::fs::remove_file(adm_paths.lock_file()) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %adm_paths.wc_dir().display(), error = %e, "failed to remove lock marker");
        }
    }
}

/// Disk check for a write-lock marker on the versioned directory `path`.
pub fn locked(config: &WcConfig, path: &Path) -> Result<bool, WcError> {
    if adm::check_wc(config, path)?.is_none() {
        return Err(WcError::NotDirectory(path.to_path_buf()));
    }
    Ok(AdmPaths::new(config, path).lock_file().exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adm::{ensure_adm, AdmInit};
    use crate::entries::Entry;
    use crate::models::Depth;

    fn make_dir(config: &WcConfig, path: &Path, url: &str, subdirs: &[&str]) {
        std::fs::create_dir_all(path).unwrap();
        ensure_adm(
            config,
            path,
            &AdmInit {
                url: url.into(),
                repos: None,
                uuid: None,
                revision: 1,
                depth: Depth::Infinity,
            },
        )
        .unwrap();
        let adm_paths = AdmPaths::new(config, path);
        let mut file = store::read_entries_file(&adm_paths).unwrap();
        for name in subdirs {
            file.entries.insert(
                name.to_string(),
                Entry {
                    name: name.to_string(),
                    kind: NodeKind::Dir,
                    revision: Some(1),
                    ..Entry::default()
                },
            );
        }
        store::write_entries_file(&adm_paths, &file).unwrap();
    }

    /// wc/ with versioned subdirectories a/ and a/b/.
    fn tree() -> (tempfile::TempDir, PathBuf, WcConfig) {
        let tmp = tempfile::tempdir().unwrap();
        let config = WcConfig::default();
        let wc = tmp.path().join("wc");
        make_dir(&config, &wc, "http://h/r", &["a"]);
        make_dir(&config, &wc.join("a"), "http://h/r/a", &["b"]);
        make_dir(&config, &wc.join("a").join("b"), "http://h/r/a/b", &[]);
        (tmp, wc, config)
    }

    #[test]
    fn test_open_infinite_locks_everything() {
        let (_tmp, wc, config) = tree();
        let cancel = CancellationToken::new();
        let (set, root) =
            LockSet::open(&config, &wc, LockMode::Write, LockDepth::INFINITE, &cancel).unwrap();
        assert_eq!(set.root(), Some(root));
        assert_eq!(set.handles().count(), 3);
        assert!(locked(&config, &wc.join("a").join("b")).unwrap());
        assert!(set.retrieve(&wc.join("a")).is_ok());
    }

    #[test]
    fn test_open_depth_limits_levels() {
        let (_tmp, wc, config) = tree();
        let cancel = CancellationToken::new();
        let (set, _) =
            LockSet::open(&config, &wc, LockMode::Write, LockDepth::levels(1), &cancel).unwrap();
        assert!(set.retrieve(&wc.join("a")).is_ok());
        assert!(matches!(
            set.retrieve(&wc.join("a").join("b")),
            Err(WcError::NotLocked(_))
        ));
        assert!(!locked(&config, &wc.join("a").join("b")).unwrap());
    }

    #[test]
    fn test_second_write_lock_fails_until_closed() {
        let (_tmp, wc, config) = tree();
        let cancel = CancellationToken::new();
        let (mut first, root) =
            LockSet::open(&config, &wc, LockMode::Write, LockDepth::THIS_DIR, &cancel).unwrap();

        let err = LockSet::open(&config, &wc, LockMode::Write, LockDepth::THIS_DIR, &cancel)
            .unwrap_err();
        assert!(matches!(err, WcError::Locked(_)));

        first.close(root).unwrap();
        LockSet::open(&config, &wc, LockMode::Write, LockDepth::THIS_DIR, &cancel).unwrap();
    }

    #[test]
    fn test_reentrant_open_in_same_set_fails() {
        let (_tmp, wc, config) = tree();
        let cancel = CancellationToken::new();
        let (mut set, _) =
            LockSet::open(&config, &wc, LockMode::Write, LockDepth::THIS_DIR, &cancel).unwrap();
        let err = set
            .open_in(&wc, LockMode::Write, LockDepth::THIS_DIR, &cancel)
            .unwrap_err();
        assert!(matches!(err, WcError::Locked(_)));
    }

    #[test]
    fn test_open_is_all_or_nothing() {
        let (_tmp, wc, config) = tree();
        let cancel = CancellationToken::new();
        // Someone else holds the deepest directory.
        let (_other, _) = LockSet::open(
            &config,
            &wc.join("a").join("b"),
            LockMode::Write,
            LockDepth::THIS_DIR,
            &cancel,
        )
        .unwrap();

        let err = LockSet::open(&config, &wc, LockMode::Write, LockDepth::INFINITE, &cancel)
            .unwrap_err();
        assert!(matches!(err, WcError::Locked(_)));
        assert!(!locked(&config, &wc).unwrap());
        assert!(!locked(&config, &wc.join("a")).unwrap());
    }

    #[test]
    fn test_missing_subdirectory_is_skipped() {
        let (_tmp, wc, config) = tree();
        std::fs::remove_dir_all(wc.join("a")).unwrap();
        let cancel = CancellationToken::new();
        let (set, _) =
            LockSet::open(&config, &wc, LockMode::Write, LockDepth::INFINITE, &cancel).unwrap();
        assert!(set.is_missing(&wc.join("a")));
        assert!(matches!(
            set.retrieve(&wc.join("a")),
            Err(WcError::NotLocked(_))
        ));
    }

    #[test]
    fn test_not_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let err = LockSet::open(
            &WcConfig::default(),
            tmp.path(),
            LockMode::Read,
            LockDepth::THIS_DIR,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, WcError::NotDirectory(_)));
    }

    #[test]
    fn test_close_root_closes_children_and_markers() {
        let (_tmp, wc, config) = tree();
        let cancel = CancellationToken::new();
        let (mut set, root) =
            LockSet::open(&config, &wc, LockMode::Write, LockDepth::INFINITE, &cancel).unwrap();
        set.close(root).unwrap();
        assert_eq!(set.handles().count(), 0);
        for p in [wc.clone(), wc.join("a"), wc.join("a").join("b")] {
            assert!(!locked(&config, &p).unwrap());
        }
    }

    #[test]
    fn test_close_removes_marker_even_when_cleanup_needed() {
        let (_tmp, wc, config) = tree();
        let cancel = CancellationToken::new();
        let (mut set, root) =
            LockSet::open(&config, &wc, LockMode::Write, LockDepth::THIS_DIR, &cancel).unwrap();
        set.set_needs_cleanup(root, true);
        set.close(root).unwrap();
        assert!(!locked(&config, &wc).unwrap());
    }

    #[test]
    fn test_drop_releases_unless_cleanup_needed() {
        let (_tmp, wc, config) = tree();
        let cancel = CancellationToken::new();
        {
            let _set =
                LockSet::open(&config, &wc, LockMode::Write, LockDepth::INFINITE, &cancel).unwrap();
        }
        assert!(!locked(&config, &wc).unwrap());

        {
            let (mut set, root) =
                LockSet::open(&config, &wc, LockMode::Write, LockDepth::THIS_DIR, &cancel)
                    .unwrap();
            set.set_needs_cleanup(root, true);
        }
        assert!(locked(&config, &wc).unwrap());
    }

    #[test]
    fn test_read_locks_leave_no_marker() {
        let (_tmp, wc, config) = tree();
        let cancel = CancellationToken::new();
        let (set, root) =
            LockSet::open(&config, &wc, LockMode::Read, LockDepth::INFINITE, &cancel).unwrap();
        assert!(!set.is_locked(root));
        assert!(!locked(&config, &wc).unwrap());
        // A writer is not blocked by readers.
        LockSet::open(&config, &wc, LockMode::Write, LockDepth::THIS_DIR, &cancel).unwrap();
    }

    #[test]
    fn test_cancelled_open() {
        let (_tmp, wc, config) = tree();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = LockSet::open(&config, &wc, LockMode::Write, LockDepth::INFINITE, &cancel)
            .unwrap_err();
        assert!(matches!(err, WcError::Cancelled));
        assert!(!locked(&config, &wc).unwrap());
    }
}
