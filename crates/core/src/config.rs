//! TOML-based configuration for the working-copy engine.
//!
//! A [`WcConfig`] value is passed explicitly to every lock-manager entry
//! point; nothing here is process-global, so two working copies with
//! different administrative directory names can be driven side by side.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// Administrative directory names the engine accepts.
pub const VALID_ADM_DIR_NAMES: [&str; 2] = [".svn", "_svn"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WcConfig {
    /// Administrative area settings.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Status classification settings.
    #[serde(default)]
    pub status: StatusConfig,

    /// Content merge settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Update/switch driver settings.
    #[serde(default)]
    pub update: UpdateConfig,
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

/// Administrative area configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminConfig {
    /// Name of the per-directory administrative area (`.svn` or `_svn`).
    #[serde(default = "default_dir_name")]
    pub dir_name: String,
}

fn default_dir_name() -> String {
    ".svn".into()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            dir_name: default_dir_name(),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    /// Glob patterns of unversioned names that status treats as ignored.
    #[serde(default = "default_global_ignores")]
    pub global_ignores: Vec<String>,
}

fn default_global_ignores() -> Vec<String> {
    [
        "*.o", "*.lo", "*.la", "#*#", ".*.rej", "*.rej", ".*~", "*~", ".#*", ".DS_Store",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            global_ignores: default_global_ignores(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Labels used for conflict markers and backup-file suffixes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeConfig {
    /// Suffix/label of the common-ancestor side (default `.old`).
    #[serde(default = "default_left_label")]
    pub left_label: String,

    /// Suffix/label of the incoming side (default `.new`).
    #[serde(default = "default_right_label")]
    pub right_label: String,

    /// Suffix/label of the pre-merge working file (default `.working`).
    #[serde(default = "default_target_label")]
    pub target_label: String,
}

fn default_left_label() -> String {
    ".old".into()
}
fn default_right_label() -> String {
    ".new".into()
}
fn default_target_label() -> String {
    ".working".into()
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            left_label: default_left_label(),
            right_label: default_right_label(),
            target_label: default_target_label(),
        }
    }
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Update/switch driver configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdateConfig {
    /// Stamp files installed by update with their last-commit time.
    #[serde(default)]
    pub use_commit_times: bool,
}

// ---------------------------------------------------------------------------
// Loading / validation
// ---------------------------------------------------------------------------

impl WcConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: WcConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate the loaded values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_ADM_DIR_NAMES.contains(&self.admin.dir_name.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "admin.dir_name".into(),
                detail: format!(
                    "'{}' is not one of {}",
                    self.admin.dir_name,
                    VALID_ADM_DIR_NAMES.join(", ")
                ),
            });
        }

        let labels = [
            ("merge.left_label", &self.merge.left_label),
            ("merge.right_label", &self.merge.right_label),
            ("merge.target_label", &self.merge.target_label),
        ];
        for (field, label) in labels {
            if label.is_empty() || label.contains('/') || label.contains('\\') {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "label must be a non-empty file-name suffix".into(),
                });
            }
        }
        if self.merge.left_label == self.merge.right_label
            || self.merge.left_label == self.merge.target_label
            || self.merge.right_label == self.merge.target_label
        {
            return Err(ConfigError::InvalidValue {
                field: "merge".into(),
                detail: "merge labels must be distinct".into(),
            });
        }

        for pattern in &self.status.global_ignores {
            if pattern.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "status.global_ignores".into(),
                    detail: "ignore patterns must not be empty".into(),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// A configuration using `name` as the administrative directory.
    pub fn with_adm_dir(name: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.admin.dir_name = name.to_string();
        config.validate()?;
        Ok(config)
    }

    /// Whether `name` is an administrative directory name.
    ///
    /// The default `.svn` is always recognised alongside the configured one.
    pub fn is_adm_dir(&self, name: &str) -> bool {
        name == self.admin.dir_name || name == ".svn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[admin]
dir_name = "_svn"

[status]
global_ignores = ["*.tmp", "build"]

[merge]
left_label = ".base"
right_label = ".theirs"
target_label = ".mine"

[update]
use_commit_times = true
"#
    }

    #[test]
    fn test_parse_sample_config() {
        let config: WcConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(config.admin.dir_name, "_svn");
        assert_eq!(config.status.global_ignores, vec!["*.tmp", "build"]);
        assert_eq!(config.merge.target_label, ".mine");
        assert!(config.update.use_commit_times);
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config: WcConfig = toml::from_str("").unwrap();
        assert_eq!(config, WcConfig::default());
        assert_eq!(config.admin.dir_name, ".svn");
        assert_eq!(config.merge.left_label, ".old");
        assert!(config.status.global_ignores.iter().any(|p| p == "*~"));
    }

    #[test]
    fn test_validate_rejects_unknown_adm_dir() {
        let mut config = WcConfig::default();
        config.admin.dir_name = ".wc".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "admin.dir_name"));
    }

    #[test]
    fn test_validate_rejects_duplicate_labels() {
        let mut config = WcConfig::default();
        config.merge.right_label = ".old".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wc.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = WcConfig::load_and_validate(&path).unwrap();
        assert_eq!(config.admin.dir_name, "_svn");
    }

    #[test]
    fn test_load_missing_file() {
        let err = WcConfig::load_from_file("/nonexistent/wc.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_is_adm_dir() {
        let config = WcConfig::with_adm_dir("_svn").unwrap();
        assert!(config.is_adm_dir("_svn"));
        assert!(config.is_adm_dir(".svn"));
        assert!(!config.is_adm_dir("src"));
    }
}
