//! Pristine text cache keyed by sha256 checksum.

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::AdmPaths;
use crate::errors::WcError;

/// Hex-encoded sha256 of `data`.
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex-encoded sha256 of the file at `path`.
pub fn checksum_file(path: &Path) -> Result<String, WcError> {
    let data = std::fs::read(path)?;
    Ok(checksum(&data))
}

/// Store `data` in the cache and return its checksum.
pub fn install(adm: &AdmPaths, data: &[u8]) -> Result<String, WcError> {
    let sum = checksum(data);
    let dest = adm.pristine(&sum);
    if !dest.exists() {
        std::fs::create_dir_all(adm.pristine_dir())?;
        let tmp = tempfile::NamedTempFile::new_in(adm.pristine_dir())?;
        std::fs::write(tmp.path(), data)?;
        tmp.persist(&dest).map_err(|e| WcError::Io(e.error))?;
        debug!(checksum = %sum, bytes = data.len(), "installed pristine text");
    }
    Ok(sum)
}

/// Read the pristine text `sum`, verifying it still hashes to `sum`.
///
/// `node` names the working file the text base belongs to, for errors.
pub fn read_verified(adm: &AdmPaths, sum: &str, node: &Path) -> Result<Vec<u8>, WcError> {
    let data = std::fs::read(adm.pristine(sum)).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => WcError::AdmCorrupt {
            path: node.to_path_buf(),
            detail: format!("pristine text {} is missing", sum),
        },
        _ => WcError::Io(e),
    })?;
    let actual = checksum(&data);
    if actual != sum {
        return Err(WcError::CorruptTextBase {
            path: node.to_path_buf(),
            expected: sum.to_string(),
            actual,
        });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WcConfig;

    #[test]
    fn test_checksum_known_value() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_install_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let adm = AdmPaths::new(&WcConfig::default(), dir.path());
        let sum = install(&adm, b"hello\n").unwrap();
        assert_eq!(sum, checksum(b"hello\n"));
        let back = read_verified(&adm, &sum, &dir.path().join("f")).unwrap();
        assert_eq!(back, b"hello\n");
        // Installing twice is fine.
        install(&adm, b"hello\n").unwrap();
    }

    #[test]
    fn test_tampered_pristine_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let adm = AdmPaths::new(&WcConfig::default(), dir.path());
        let sum = install(&adm, b"hello\n").unwrap();
        std::fs::write(adm.pristine(&sum), b"tampered\n").unwrap();
        let err = read_verified(&adm, &sum, &dir.path().join("f")).unwrap_err();
        assert!(matches!(err, WcError::CorruptTextBase { ref expected, .. } if *expected == sum));
    }
}
