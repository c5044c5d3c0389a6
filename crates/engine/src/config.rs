//! Batch update configuration via `refbatch.toml`
//!
//! Every key is optional; a missing key takes its default. Values are
//! validated eagerly when the file is loaded.

use std::path::Path;

use serde::{Deserialize, Serialize};

use refbatch_concurrency::RetryConfig;
use refbatch_core::{UpdateError, UpdateResult};
use refbatch_notes::DEFAULT_MAX_ENTRIES;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "refbatch.toml";

/// Relative order of the repo and change phases within one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseOrder {
    /// Change phase first, then repo phase
    #[default]
    ChangeFirst,
    /// Repo phase first, then change phase
    RepoFirst,
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

/// `[cache]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached snapshots; 0 disables the cache
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

/// Configuration loaded from `refbatch.toml`
///
/// # Example
///
/// ```toml
/// phase_order = "change-first"
///
/// [retry]
/// max_attempts = 5
/// base_delay_ms = 10
/// max_delay_ms = 200
/// jitter = true
///
/// [cache]
/// max_entries = 1024
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Order of the repo and change phases
    #[serde(default)]
    pub phase_order: PhaseOrder,
    /// Retry/contention policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Snapshot cache
    #[serde(default)]
    pub cache: CacheConfig,
}

impl UpdateConfig {
    /// Default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# refbatch configuration
#
# Order of operation phases within one attempt:
#   "change-first" (default) = compute metadata deltas, then raw ref updates
#   "repo-first"             = raw ref updates, then metadata deltas
phase_order = "change-first"

[retry]
# Total commit attempts including the first
max_attempts = 5
# Backoff before the second attempt, doubled for each later one
base_delay_ms = 10
# Cap on any single backoff
max_delay_ms = 200
# Randomize each backoff within [delay/2, delay]
jitter = true

[cache]
# Cached change snapshots (0 disables caching)
max_entries = 1024
"#
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> UpdateResult<Self> {
        let config: UpdateConfig = toml::from_str(content)
            .map_err(|e| UpdateError::bad_request(format!("invalid refbatch config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn from_file(path: &Path) -> UpdateResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| UpdateError::Storage {
            message: format!("failed to read config file '{}': {}", path.display(), e),
            source: Some(Box::new(e)),
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            UpdateError::BadRequest(msg) => {
                UpdateError::bad_request(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Write the default config file unless one exists
    pub fn write_default_if_missing(path: &Path) -> UpdateResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Reject invalid values
    pub fn validate(&self) -> UpdateResult<()> {
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_matches_default() {
        let parsed = UpdateConfig::from_toml_str(UpdateConfig::default_toml()).unwrap();
        assert_eq!(parsed, UpdateConfig::default());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = UpdateConfig::from_toml_str("").unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.cache.max_entries, 1024);
        assert_eq!(config.phase_order, PhaseOrder::ChangeFirst);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = UpdateConfig::from_toml_str("[retry]\nmax_attempts = 2\n").unwrap();
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_delay_ms, 200);
        assert!(config.retry.jitter);
    }

    #[test]
    fn repo_first_parses() {
        let config = UpdateConfig::from_toml_str("phase_order = \"repo-first\"").unwrap();
        assert_eq!(config.phase_order, PhaseOrder::RepoFirst);
    }

    #[test]
    fn invalid_values_are_bad_requests() {
        for bad in [
            "phase_order = \"sideways\"",
            "[retry]\nmax_attempts = 0\n",
            "[retry]\nbase_delay_ms = 500\nmax_delay_ms = 10\n",
            "[cache]\nmax_entries = -1\n",
        ] {
            let err = UpdateConfig::from_toml_str(bad).unwrap_err();
            assert!(err.is_business(), "{} gave {:?}", bad, err);
        }
    }

    #[test]
    fn from_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        UpdateConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(UpdateConfig::from_file(&path).unwrap(), UpdateConfig::default());

        std::fs::write(&path, "[cache]\nmax_entries = 0\n").unwrap();
        UpdateConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(UpdateConfig::from_file(&path).unwrap().cache.max_entries, 0);
    }

    #[test]
    fn missing_file_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let err = UpdateConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(err.kind(), refbatch_core::ErrorKind::Storage);
    }
}
