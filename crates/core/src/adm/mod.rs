//! Per-directory administrative area.
//!
//! Every versioned directory carries a hidden area (named by
//! [`WcConfig::admin`]) laid out as:
//!
//! ```text
//! <adm>/format        integer format number
//! <adm>/entries       JSON entry table + tree-conflict records
//! <adm>/props         JSON base/working properties per node
//! <adm>/lock          write-lock marker, presence alone is the lock
//! <adm>/pristine/     pristine texts keyed by sha256
//! <adm>/conflicts/    fulltexts referenced by tree-conflict records
//! <adm>/tmp/          scratch space, emptied by cleanup
//! ```

pub mod pristine;
pub mod props;
pub mod store;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::WcConfig;
use crate::entries::{Entry, Schedule};
use crate::errors::WcError;
use crate::models::{Depth, NodeKind, Revnum, THIS_DIR};

pub use store::EntriesFile;

/// Current on-disk format number.
pub const FORMAT: u32 = 1;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Locations inside one directory's administrative area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmPaths {
    wc_dir: PathBuf,
    adm_dir: PathBuf,
}

impl AdmPaths {
    pub fn new(config: &WcConfig, wc_dir: &Path) -> Self {
        Self {
            wc_dir: wc_dir.to_path_buf(),
            adm_dir: wc_dir.join(&config.admin.dir_name),
        }
    }

    pub fn wc_dir(&self) -> &Path {
        &self.wc_dir
    }

    pub fn adm_dir(&self) -> &Path {
        &self.adm_dir
    }

    pub fn format_file(&self) -> PathBuf {
        self.adm_dir.join("format")
    }

    pub fn entries_file(&self) -> PathBuf {
        self.adm_dir.join("entries")
    }

    pub fn props_file(&self) -> PathBuf {
        self.adm_dir.join("props")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.adm_dir.join("lock")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.adm_dir.join("tmp")
    }

    pub fn pristine_dir(&self) -> PathBuf {
        self.adm_dir.join("pristine")
    }

    pub fn conflicts_dir(&self) -> PathBuf {
        self.adm_dir.join("conflicts")
    }

    /// Location of the pristine text with the given checksum.
    pub fn pristine(&self, checksum: &str) -> PathBuf {
        self.pristine_dir().join(checksum)
    }
}

// ---------------------------------------------------------------------------
// Area lifecycle
// ---------------------------------------------------------------------------

/// Values recorded in a freshly created directory's self entry.
#[derive(Debug, Clone)]
pub struct AdmInit {
    pub url: String,
    pub repos: Option<String>,
    pub uuid: Option<String>,
    pub revision: Revnum,
    pub depth: Depth,
}

/// Return the format number if `path` is a versioned directory.
pub fn check_wc(config: &WcConfig, path: &Path) -> Result<Option<u32>, WcError> {
    if !path.is_dir() {
        return Ok(None);
    }
    let adm = AdmPaths::new(config, path);
    let raw = match std::fs::read_to_string(adm.format_file()) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let format = raw.trim().parse::<u32>().map_err(|e| WcError::AdmCorrupt {
        path: path.to_path_buf(),
        detail: format!("bad format file: {}", e),
    })?;
    Ok(Some(format))
}

/// Whether `name` is an administrative directory name under `config`.
pub fn is_adm_dir(config: &WcConfig, name: &str) -> bool {
    config.is_adm_dir(name)
}

/// Make sure `path` holds an administrative area describing `init.url`.
///
/// An existing area is accepted when it records the same URL, or when its
/// directory is scheduled for deletion (it is about to be replaced). A
/// different URL means the directory belongs to something else and fails
/// with [`WcError::Obstructed`].
pub fn ensure_adm(config: &WcConfig, path: &Path, init: &AdmInit) -> Result<(), WcError> {
    if check_wc(config, path)?.is_some() {
        let adm = AdmPaths::new(config, path);
        let file = store::read_entries_file(&adm)?;
        let this_dir = file
            .entries
            .get(THIS_DIR)
            .ok_or_else(|| WcError::AdmCorrupt {
                path: path.to_path_buf(),
                detail: "missing directory self entry".into(),
            })?;
        let same_url = this_dir.url.as_deref() == Some(init.url.as_str());
        if !same_url && this_dir.schedule != Schedule::Delete {
            return Err(WcError::Obstructed(path.to_path_buf()));
        }
        debug!(path = %path.display(), "administrative area already present");
        return Ok(());
    }

    info!(path = %path.display(), url = %init.url, revision = init.revision, "creating administrative area");
    let adm = AdmPaths::new(config, path);
    std::fs::create_dir_all(adm.tmp_dir())?;
    std::fs::create_dir_all(adm.pristine_dir())?;
    std::fs::create_dir_all(adm.conflicts_dir())?;

    let this_dir = Entry {
        name: THIS_DIR.to_string(),
        kind: NodeKind::Dir,
        revision: Some(init.revision),
        url: Some(init.url.clone()),
        repos: init.repos.clone(),
        uuid: init.uuid.clone(),
        depth: init.depth,
        ..Entry::default()
    };
    let mut file = EntriesFile::new();
    file.entries.insert(THIS_DIR.to_string(), this_dir);
    store::write_entries_file(&adm, &file)?;
    props::write_props(&adm, &Default::default())?;

    // The format file goes last: its presence is what makes the area valid.
    std::fs::write(adm.format_file(), format!("{}\n", FORMAT))?;
    Ok(())
}

/// Delete the administrative area of `path` entirely.
pub(crate) fn destroy_adm(config: &WcConfig, path: &Path) -> Result<(), WcError> {
    let adm = AdmPaths::new(config, path);
    match std::fs::remove_dir_all(adm.adm_dir()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove every file in the area's scratch directory.
pub(crate) fn clear_tmp(adm: &AdmPaths) -> Result<usize, WcError> {
    let dir = adm.tmp_dir();
    let rd = match std::fs::read_dir(&dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(&dir)?;
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0;
    for item in rd {
        let item = item?;
        if item.file_type()?.is_dir() {
            std::fs::remove_dir_all(item.path())?;
        } else {
            std::fs::remove_file(item.path())?;
        }
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(url: &str) -> AdmInit {
        AdmInit {
            url: url.into(),
            repos: Some("http://host/repo".into()),
            uuid: Some("uuid-1".into()),
            revision: 3,
            depth: Depth::Infinity,
        }
    }

    #[test]
    fn test_ensure_adm_creates_area() {
        let dir = tempfile::tempdir().unwrap();
        let config = WcConfig::default();
        assert_eq!(check_wc(&config, dir.path()).unwrap(), None);

        ensure_adm(&config, dir.path(), &init("http://host/repo/trunk")).unwrap();
        assert_eq!(check_wc(&config, dir.path()).unwrap(), Some(FORMAT));

        let adm = AdmPaths::new(&config, dir.path());
        let file = store::read_entries_file(&adm).unwrap();
        let this_dir = &file.entries[THIS_DIR];
        assert_eq!(this_dir.revision, Some(3));
        assert_eq!(this_dir.kind, NodeKind::Dir);
        assert!(adm.tmp_dir().is_dir());
    }

    #[test]
    fn test_ensure_adm_same_url_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = WcConfig::default();
        ensure_adm(&config, dir.path(), &init("http://host/repo/trunk")).unwrap();
        ensure_adm(&config, dir.path(), &init("http://host/repo/trunk")).unwrap();
    }

    #[test]
    fn test_ensure_adm_other_url_is_obstructed() {
        let dir = tempfile::tempdir().unwrap();
        let config = WcConfig::default();
        ensure_adm(&config, dir.path(), &init("http://host/repo/trunk")).unwrap();
        let err = ensure_adm(&config, dir.path(), &init("http://host/repo/branch")).unwrap_err();
        assert!(matches!(err, WcError::Obstructed(_)));
    }

    #[test]
    fn test_configured_adm_dir_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = WcConfig::with_adm_dir("_svn").unwrap();
        ensure_adm(&config, dir.path(), &init("http://host/repo")).unwrap();
        assert!(dir.path().join("_svn").join("format").is_file());
        assert!(!dir.path().join(".svn").exists());
        assert_eq!(check_wc(&WcConfig::default(), dir.path()).unwrap(), None);
    }

    #[test]
    fn test_clear_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let config = WcConfig::default();
        ensure_adm(&config, dir.path(), &init("http://host/repo")).unwrap();
        let adm = AdmPaths::new(&config, dir.path());
        std::fs::write(adm.tmp_dir().join("scratch"), "x").unwrap();
        assert_eq!(clear_tmp(&adm).unwrap(), 1);
        assert_eq!(std::fs::read_dir(adm.tmp_dir()).unwrap().count(), 0);
    }
}
