//! Value types shared by every layer of the working-copy engine.
//!
//! Node kinds, traversal depths, revision numbers and property maps live
//! here so the lock manager, entry store, detector and drivers agree on a
//! single vocabulary.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::WcError;

/// A repository revision number.
pub type Revnum = i64;

/// Versioned properties of a single node, keyed by property name.
pub type Props = BTreeMap<String, String>;

/// Reserved entry name of a directory's own record.
pub const THIS_DIR: &str = "";

/// Property holding the MIME type of a file.
pub const PROP_MIME_TYPE: &str = "svn:mime-type";

/// Property holding newline-separated ignore patterns of a directory.
pub const PROP_IGNORE: &str = "svn:ignore";

pub const PROP_EXECUTABLE: &str = "svn:executable";
pub const PROP_EOL_STYLE: &str = "svn:eol-style";
pub const PROP_KEYWORDS: &str = "svn:keywords";
pub const PROP_NEEDS_LOCK: &str = "svn:needs-lock";
pub const PROP_EXTERNALS: &str = "svn:externals";

/// Names with these prefixes are bookkeeping, not regular properties.
pub const PROP_ENTRY_PREFIX: &str = "svn:entry:";
pub const PROP_WC_PREFIX: &str = "svn:wc:";

// ---------------------------------------------------------------------------
// Node kind
// ---------------------------------------------------------------------------

/// The kind of a node, either as recorded or as found on disk.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    None,
    File,
    Dir,
    Unknown,
}

impl NodeKind {
    /// Probe the filesystem for the kind of `path` without following symlinks.
    pub fn on_disk(path: &Path) -> Result<NodeKind, WcError> {
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(NodeKind::Dir),
            Ok(meta) if meta.is_file() => Ok(NodeKind::File),
            Ok(_) => Ok(NodeKind::Unknown),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeKind::None),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "dir"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Depth
// ---------------------------------------------------------------------------

/// How far below a directory an operation (or a sparse checkout) reaches.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    /// Not recorded; treated like `Infinity`.
    Unknown,
    /// The directory itself only.
    Empty,
    /// The directory and its file children.
    Files,
    /// The directory and all immediate children, subdirectories empty.
    Immediates,
    #[default]
    Infinity,
}

impl Depth {
    /// Depth to use for a subdirectory one level down.
    pub fn descend(self) -> Depth {
        match self {
            Depth::Infinity | Depth::Unknown => Depth::Infinity,
            Depth::Immediates | Depth::Files | Depth::Empty => Depth::Empty,
        }
    }

    pub fn includes_files(self) -> bool {
        !matches!(self, Depth::Empty)
    }

    pub fn includes_dirs(self) -> bool {
        matches!(self, Depth::Immediates | Depth::Infinity | Depth::Unknown)
    }
}

impl std::fmt::Display for Depth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Empty => write!(f, "empty"),
            Self::Files => write!(f, "files"),
            Self::Immediates => write!(f, "immediates"),
            Self::Infinity => write!(f, "infinity"),
        }
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// One incoming property change; `value == None` deletes the property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropChange {
    pub name: String,
    pub value: Option<String>,
}

impl PropChange {
    pub fn set(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: Some(value.to_string()),
        }
    }

    pub fn delete(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
        }
    }
}

/// Whether a MIME type describes binary content.
pub fn is_binary_mime_type(mime_type: &str) -> bool {
    !mime_type.starts_with("text/") && !mime_type.is_empty()
}

/// Heuristic used when no MIME type is recorded: any NUL byte marks binary.
pub fn looks_binary(data: &[u8]) -> bool {
    data.contains(&0)
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Normalize a path lexically so it can be used as a lookup key.
pub fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Split `path` into its parent directory and final component name.
pub fn split_path(path: &Path) -> Result<(PathBuf, String), WcError> {
    let path = normalize(path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| WcError::InvalidOperation {
            path: path.clone(),
            detail: "path has no final component".into(),
        })?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((parent, name))
}

/// Join a `/`-separated relative path onto `base`.
pub fn join_relpath(base: &Path, relpath: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for part in relpath.split('/').filter(|p| !p.is_empty()) {
        out.push(part);
    }
    out
}

/// Append a path component to a repository URL.
pub fn join_url(url: &str, name: &str) -> String {
    if name.is_empty() {
        return url.to_string();
    }
    format!("{}/{}", url.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_descend() {
        assert_eq!(Depth::Infinity.descend(), Depth::Infinity);
        assert_eq!(Depth::Immediates.descend(), Depth::Empty);
        assert_eq!(Depth::Unknown.descend(), Depth::Infinity);
        assert!(Depth::Files.includes_files());
        assert!(!Depth::Files.includes_dirs());
        assert!(!Depth::Empty.includes_files());
    }

    #[test]
    fn test_split_path() {
        let (parent, name) = split_path(Path::new("/wc/dir/file.txt")).unwrap();
        assert_eq!(parent, PathBuf::from("/wc/dir"));
        assert_eq!(name, "file.txt");

        let (parent, name) = split_path(Path::new("file.txt")).unwrap();
        assert_eq!(parent, PathBuf::from("."));
        assert_eq!(name, "file.txt");
    }

    #[test]
    fn test_normalize_strips_cur_dir() {
        assert_eq!(normalize(Path::new("/wc/./a/")), PathBuf::from("/wc/a"));
    }

    #[test]
    fn test_join_helpers() {
        assert_eq!(
            join_relpath(Path::new("/wc"), "a/b"),
            PathBuf::from("/wc/a/b")
        );
        assert_eq!(join_relpath(Path::new("/wc"), ""), PathBuf::from("/wc"));
        assert_eq!(join_url("http://h/repo/", "x"), "http://h/repo/x");
        assert_eq!(join_url("http://h/repo", ""), "http://h/repo");
    }

    #[test]
    fn test_binary_detection() {
        assert!(is_binary_mime_type("application/octet-stream"));
        assert!(!is_binary_mime_type("text/plain"));
        assert!(looks_binary(b"ab\0cd"));
        assert!(!looks_binary(b"plain text\n"));
    }

    #[test]
    fn test_node_kind_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "x").unwrap();
        assert_eq!(NodeKind::on_disk(dir.path()).unwrap(), NodeKind::Dir);
        assert_eq!(NodeKind::on_disk(&file).unwrap(), NodeKind::File);
        assert_eq!(
            NodeKind::on_disk(&dir.path().join("nope")).unwrap(),
            NodeKind::None
        );
    }
}
