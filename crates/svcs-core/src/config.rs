//! Repository configuration
//!
//! Loaded from TOML or YAML (chosen by file extension), then overridden by
//! environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SVCS_STORE_PATH` | `storage.path` (switches to the filesystem backend) |
//! | `SVCS_CELL_SIZE` | `index.cell_size` |
//! | `SVCS_IDLE_TIMEOUT_MS` | `ingest.idle_timeout_ms` |
//! | `SVCS_IDLE_ACTION` | `ingest.idle_action` |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use svcs_ingest::IngestConfig;
use svcs_merge::ConflictPolicy;

/// Full repository configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Branch created with the repository
    #[serde(default = "default_branch")]
    pub default_branch: String,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub merge: MergeConfig,
}

/// Chunk store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Object directory (filesystem backend only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Decoded chunks kept in the read cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Grid cell edge in metres
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub policy: ConflictPolicy,
}

fn default_branch() -> String {
    "main".into()
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_cell_size() -> f64 {
    0.5
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: None,
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
        }
    }
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            storage: StorageConfig::default(),
            index: IndexConfig::default(),
            ingest: IngestConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl RepoConfig {
    /// In-memory repository with the given grid
    #[must_use]
    pub fn in_memory(cell_size: f64) -> Self {
        Self {
            index: IndexConfig { cell_size },
            ..Self::default()
        }
    }

    /// Filesystem-backed repository rooted at `path`
    #[must_use]
    pub fn on_disk(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Filesystem,
                path: Some(path.into()),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file, apply environment
    /// overrides and validate
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, an override is
    /// malformed, or the result fails validation
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let mut config = match extension.as_deref() {
            Some("toml") => Self::from_toml_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }?;
        config.apply_env()?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError::Parse`] on malformed input
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// # Errors
    /// Returns [`ConfigError::Parse`] on malformed input
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `SVCS_*` overrides from the process environment
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if a variable does not parse
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SVCS_*` overrides from an arbitrary lookup
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if a value does not parse
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("SVCS_STORE_PATH") {
            self.storage.backend = StorageBackend::Filesystem;
            self.storage.path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup("SVCS_CELL_SIZE") {
            self.index.cell_size = parse("SVCS_CELL_SIZE", &value)?;
        }
        if let Some(value) = lookup("SVCS_IDLE_TIMEOUT_MS") {
            self.ingest.idle_timeout_ms = parse("SVCS_IDLE_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("SVCS_IDLE_ACTION") {
            self.ingest.idle_action = parse("SVCS_IDLE_ACTION", &value)?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));
        if !(self.index.cell_size.is_finite() && self.index.cell_size > 0.0) {
            return invalid("index.cell_size must be positive");
        }
        if self.default_branch.trim().is_empty() {
            return invalid("default_branch must not be empty");
        }
        if self.storage.cache_capacity == 0 {
            return invalid("storage.cache_capacity must be at least 1");
        }
        if self.storage.backend == StorageBackend::Filesystem && self.storage.path.is_none() {
            return invalid("storage.path is required for the filesystem backend");
        }
        if self.ingest.channel_capacity == 0 {
            return invalid("ingest.channel_capacity must be at least 1");
        }
        if self.ingest.idle_timeout_ms == 0 {
            return invalid("ingest.idle_timeout_ms must be at least 1");
        }
        Ok(())
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        reason: e.to_string(),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unsupported config format: {0} (expected .toml, .yaml or .yml)")]
    UnsupportedFormat(PathBuf),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use svcs_ingest::IdleAction;

    #[test]
    fn defaults_are_valid() {
        let config = RepoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_branch, "main");
        assert_eq!(config.merge.policy, ConflictPolicy::Manual);
    }

    #[test]
    fn toml_sections_fill_defaults() {
        let config = RepoConfig::from_toml_str(
            r#"
            default_branch = "trunk"

            [storage]
            backend = "filesystem"
            path = "/tmp/svcs"

            [ingest]
            idle_action = "abort"

            [merge]
            policy = "theirs"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_branch, "trunk");
        assert_eq!(config.storage.backend, StorageBackend::Filesystem);
        assert_eq!(config.storage.cache_capacity, 10_000);
        assert_eq!(config.ingest.idle_action, IdleAction::Abort);
        assert_eq!(config.ingest.channel_capacity, 256);
        assert_eq!(config.merge.policy, ConflictPolicy::Theirs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_is_accepted() {
        let config = RepoConfig::from_yaml_str("index:\n  cell_size: 0.25\n").unwrap();
        assert!((config.index.cell_size - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("SVCS_STORE_PATH", "/data/objects"),
            ("SVCS_CELL_SIZE", "2.0"),
            ("SVCS_IDLE_TIMEOUT_MS", "1500"),
            ("SVCS_IDLE_ACTION", "abort"),
        ]
        .into_iter()
        .collect();
        let mut config = RepoConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| (*v).to_owned()))
            .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Filesystem);
        assert_eq!(config.storage.path, Some(PathBuf::from("/data/objects")));
        assert!((config.index.cell_size - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.ingest.idle_timeout_ms, 1500);
        assert_eq!(config.ingest.idle_action, IdleAction::Abort);
    }

    #[test]
    fn malformed_override_is_reported() {
        let mut config = RepoConfig::default();
        let err = config
            .apply_overrides(|k| (k == "SVCS_CELL_SIZE").then(|| "wide".to_owned()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "SVCS_CELL_SIZE", .. }));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = RepoConfig::in_memory(0.0);
        assert!(config.validate().is_err());
        config.index.cell_size = 1.0;
        config.ingest.channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut disk = RepoConfig::on_disk("/tmp/x");
        disk.storage.path = None;
        assert!(disk.validate().is_err());
    }
}
