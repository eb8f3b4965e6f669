//! Text and property conflict resolution callback.
//!
//! While merging a file (or a property) the driver hands a
//! [`ConflictDescription`] to the caller's [`ConflictResolver`]; the returned
//! [`ConflictChoice`] tells the driver which fulltext becomes the working
//! content. Tree conflicts never reach a resolver.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{ConflictAction, ConflictReason};
use crate::errors::WcError;
use crate::models::NodeKind;

/// What kind of content conflicted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Text,
    Property,
}

/// Everything a resolver may inspect. Fulltexts are temporary files that
/// stay valid for the duration of the call only.
#[derive(Debug, Clone)]
pub struct ConflictDescription {
    pub path: PathBuf,
    pub node_kind: NodeKind,
    pub kind: ConflictKind,
    /// Set for property conflicts.
    pub property_name: Option<String>,
    pub is_binary: bool,
    pub mime_type: Option<String>,
    pub action: ConflictAction,
    pub reason: ConflictReason,
    /// Common ancestor (merge-left).
    pub base_file: Option<PathBuf>,
    /// Incoming version (merge-right).
    pub their_file: Option<PathBuf>,
    /// The working file before the merge.
    pub my_file: Option<PathBuf>,
    /// Merge result with conflict markers; a resolver may edit it in place.
    pub merged_file: Option<PathBuf>,
}

/// The resolver's answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    /// Leave the conflict in place.
    Conflicted,
    /// The resolver already wrote the final working content.
    Resolved,
    ChooseBase,
    ChooseRepository,
    ChooseWorking,
    ChooseMerged,
}

impl std::fmt::Display for ConflictChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflicted => write!(f, "conflicted"),
            Self::Resolved => write!(f, "resolved"),
            Self::ChooseBase => write!(f, "choose_base"),
            Self::ChooseRepository => write!(f, "choose_repository"),
            Self::ChooseWorking => write!(f, "choose_working"),
            Self::ChooseMerged => write!(f, "choose_merged"),
        }
    }
}

/// Callback consulted for every text or property conflict.
pub trait ConflictResolver {
    fn resolve(&mut self, description: &ConflictDescription) -> Result<ConflictChoice, WcError>;
}

impl<F> ConflictResolver for F
where
    F: FnMut(&ConflictDescription) -> Result<ConflictChoice, WcError>,
{
    fn resolve(&mut self, description: &ConflictDescription) -> Result<ConflictChoice, WcError> {
        self(description)
    }
}

/// Leaves every conflict for later.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postpone;

impl ConflictResolver for Postpone {
    fn resolve(&mut self, _description: &ConflictDescription) -> Result<ConflictChoice, WcError> {
        Ok(ConflictChoice::Conflicted)
    }
}

/// Answers every conflict with the same choice.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysChoose(pub ConflictChoice);

impl ConflictResolver for AlwaysChoose {
    fn resolve(&mut self, _description: &ConflictDescription) -> Result<ConflictChoice, WcError> {
        Ok(self.0)
    }
}
