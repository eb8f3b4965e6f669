//! svnwc core library.
//!
//! This crate provides the client-side engine of a versioned working copy:
//! hierarchical directory locking, the per-directory entry store, local
//! status, tree-conflict detection while update/switch/merge drives apply
//! incoming changes, three-way text and property merging, and the local
//! operations (add, delete, revert, resolve, ...) that edit the entries.

pub mod adm;
pub mod cancel;
pub mod config;
pub mod conflict;
pub mod editor;
pub mod entries;
pub mod errors;
pub mod lock;
pub mod models;
pub mod notify;
pub mod ops;
pub mod status;

#[cfg(test)]
mod testutil;

// Re-exports for convenience.
pub use cancel::CancellationToken;
pub use config::WcConfig;
pub use errors::{CoreError, WcError};
pub use lock::{LockDepth, LockMode, LockSet};
pub use notify::{Notification, NotificationSink};
