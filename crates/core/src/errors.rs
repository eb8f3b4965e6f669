//! Error types for the working-copy engine.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Wc(#[from] WcError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Working-copy errors
// ---------------------------------------------------------------------------

/// Errors raised by locking, entry access, local operations and drivers.
#[derive(Debug, Error)]
pub enum WcError {
    /// Another write lock is already present on the directory.
    #[error("working copy '{}' is locked", .0.display())]
    Locked(PathBuf),

    /// The directory has no open handle in the lock set.
    #[error("working copy '{}' is not locked", .0.display())]
    NotLocked(PathBuf),

    /// The path is not a versioned working-copy directory.
    #[error("'{}' is not a working copy directory", .0.display())]
    NotDirectory(PathBuf),

    /// The path does not exist on disk.
    #[error("path '{}' not found", .0.display())]
    PathNotFound(PathBuf),

    /// No entry is recorded for the path.
    #[error("'{}' is not under version control", .0.display())]
    EntryNotFound(PathBuf),

    /// An unversioned directory collides with a file scheduled for removal
    /// or already deleted (or the other way round).
    #[error("can't replace '{}' with a node of a different kind", .0.display())]
    NodeKindChange(PathBuf),

    /// Destructive removal left locally modified files in place.
    #[error("{} locally modified file(s) left in place", .paths.len())]
    LeftLocalMod { paths: Vec<PathBuf> },

    /// The pristine copy no longer matches its recorded checksum.
    #[error("checksum mismatch for text base of '{}': expected {expected}, actual {actual}", .path.display())]
    CorruptTextBase {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The caller-supplied cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Something unversioned occupies a path the operation needs.
    #[error("'{}' is obstructed", .0.display())]
    Obstructed(PathBuf),

    /// The request does not make sense for the node's current state.
    #[error("invalid operation on '{}': {detail}", .path.display())]
    InvalidOperation { path: PathBuf, detail: String },

    /// The administrative area could not be read or parsed.
    #[error("corrupt administrative area at '{}': {detail}", .path.display())]
    AdmCorrupt { path: PathBuf, detail: String },

    /// Generic I/O wrapper.
    #[error("working copy I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WcError {
    /// Structural failures abort a whole driven operation.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            WcError::Locked(_) | WcError::NotLocked(_) | WcError::NotDirectory(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
