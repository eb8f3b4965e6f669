//! Recovery of interrupted write locks.

use std::path::Path;

use tracing::{debug, info};

use crate::adm::{self, store, AdmPaths};
use crate::cancel::CancellationToken;
use crate::config::WcConfig;
use crate::errors::WcError;
use crate::models::{normalize, NodeKind, THIS_DIR};

/// Take over every lock marker under `path` and clear scratch space.
///
/// No liveness check is made: whoever left the markers is assumed gone.
/// Returns the number of markers removed.
pub fn cleanup(
    config: &WcConfig,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<usize, WcError> {
    let path = normalize(path);
    if adm::check_wc(config, &path)?.is_none() {
        return Err(WcError::NotDirectory(path));
    }
    let removed = cleanup_dir(config, &path, cancel)?;
    info!(path = %path.display(), markers = removed, "cleanup finished");
    Ok(removed)
}

fn cleanup_dir(config: &WcConfig, path: &Path, cancel: &CancellationToken) -> Result<usize, WcError> {
    cancel.check()?;
    let adm_paths = AdmPaths::new(config, path);

    let mut removed = 0;
    match std::fs::remove_file(adm_paths.lock_file()) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale lock marker");
            removed += 1;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    adm::clear_tmp(&adm_paths)?;

    let file = store::read_entries_file(&adm_paths)?;
    for entry in file.entries.values() {
        if entry.name == THIS_DIR || entry.kind != NodeKind::Dir || entry.is_hidden() {
            continue;
        }
        let child = path.join(&entry.name);
        if child.is_dir() && adm::check_wc(config, &child)?.is_some() {
            removed += cleanup_dir(config, &child, cancel)?;
        }
    }
    Ok(removed)
}
