//! Configuration types for redis-migrate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::endpoint::StoreEndpoint;
use crate::error::{Error, Result};

/// How an existing destination hash is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashOverwriteMode {
    /// Merge at field granularity.
    Field,
    /// Replace the whole hash (default).
    #[default]
    Key,
}

impl FromStr for HashOverwriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "field" => Ok(Self::Field),
            "key" => Ok(Self::Key),
            other => Err(Error::Config(format!(
                "hash overwrite mode must be 'field' or 'key', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for HashOverwriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Field => "field",
            Self::Key => "key",
        })
    }
}

/// What to do with a key whose type cannot be migrated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsupportedTypePolicy {
    /// Fail the whole run (default).
    #[default]
    Abort,
    /// Log, count and continue with the next key.
    Skip,
}

/// Whether source keys are kept or removed after transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    /// Keep source keys. Enumerates the full match set with `KEYS`.
    #[default]
    Copy,
    /// Delete each source key after it was written. Pages with `SCAN`.
    Move,
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Copy => "copy",
            Self::Move => "move",
        })
    }
}

/// Engine tuning shared by copy and move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Keys transferred concurrently within one page.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Policy for keys of unsupported types.
    #[serde(default)]
    pub unsupported_type: UnsupportedTypePolicy,
    /// Show a progress spinner.
    #[serde(default)]
    pub progress: bool,
    /// Per-command timeout in seconds.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            unsupported_type: UnsupportedTypePolicy::default(),
            progress: false,
            command_timeout_secs: None,
        }
    }
}

impl MigrationOptions {
    /// Per-command timeout, if configured.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

/// A fully resolved copy or move request.
///
/// Build it with [`MigrationRequest::new`] and the `with_*` methods; the
/// engine validates it once before any I/O and never modifies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    /// Store keys are read from.
    pub source: StoreEndpoint,
    /// Store keys are written to.
    pub destination: StoreEndpoint,
    /// Glob pattern selecting keys.
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Replace keys that already exist at the destination.
    #[serde(default)]
    pub overwrite: bool,
    /// Treatment of hashes that already exist at the destination.
    #[serde(default)]
    pub hash_overwrite_mode: HashOverwriteMode,
    /// `SCAN` page size for move; chunk size for copy.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Engine tuning.
    #[serde(default)]
    pub options: MigrationOptions,
}

impl MigrationRequest {
    /// Creates a request with default pattern, policy and page size.
    pub fn new(source: StoreEndpoint, destination: StoreEndpoint) -> Self {
        Self {
            source,
            destination,
            pattern: default_pattern(),
            overwrite: false,
            hash_overwrite_mode: HashOverwriteMode::default(),
            page_size: default_page_size(),
            options: MigrationOptions::default(),
        }
    }

    /// Sets the key pattern. An empty pattern means `*`.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.pattern = if pattern.is_empty() {
            default_pattern()
        } else {
            pattern
        };
        self
    }

    /// Sets the overwrite flag.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Sets the hash overwrite mode.
    #[must_use]
    pub fn with_hash_overwrite_mode(mut self, mode: HashOverwriteMode) -> Self {
        self.hash_overwrite_mode = mode;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets engine options.
    #[must_use]
    pub fn with_options(mut self, options: MigrationOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate the request.
    ///
    /// # Errors
    ///
    /// Returns an error if source and destination are the same database or
    /// a numeric setting is zero.
    pub fn validate(&self) -> Result<()> {
        if self.source == self.destination {
            return Err(Error::SameEndpoint(self.source.to_string()));
        }
        if self.page_size == 0 {
            return Err(Error::Config("page size must be greater than 0".to_string()));
        }
        if self.options.concurrency == 0 {
            return Err(Error::Config("concurrency must be greater than 0".to_string()));
        }
        if self.options.command_timeout_secs == Some(0) {
            return Err(Error::Config("command timeout must be greater than 0".to_string()));
        }
        if self.pattern.is_empty() {
            return Err(Error::Config("pattern cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Migration described in a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Copy or move.
    #[serde(default)]
    pub mode: MigrationMode,
    /// Endpoints, key selection and options.
    #[serde(flatten)]
    pub request: MigrationRequest,
}

fn default_pattern() -> String {
    "*".to_string()
}

fn default_page_size() -> usize {
    1000
}

fn default_concurrency() -> usize {
    1
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        self.request.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn endpoints() -> (StoreEndpoint, StoreEndpoint) {
        (
            StoreEndpoint::new("10.0.0.1", 6379, 0),
            StoreEndpoint::new("10.0.0.2", 6379, 0),
        )
    }

    #[test]
    fn test_request_defaults() {
        let (src, dst) = endpoints();
        let request = MigrationRequest::new(src, dst);
        assert_eq!(request.pattern, "*");
        assert!(!request.overwrite);
        assert_eq!(request.hash_overwrite_mode, HashOverwriteMode::Key);
        assert_eq!(request.page_size, 1000);
        assert_eq!(request.options.concurrency, 1);
        assert_eq!(request.options.unsupported_type, UnsupportedTypePolicy::Abort);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_empty_pattern_means_all() {
        let (src, dst) = endpoints();
        let request = MigrationRequest::new(src, dst).with_pattern("");
        assert_eq!(request.pattern, "*");
    }

    #[test]
    fn test_validate_rejects_same_endpoint() {
        let src = StoreEndpoint::new("localhost", 6379, 1).with_auth("a");
        let dst = StoreEndpoint::new("localhost", 6379, 1).with_auth("b");
        let err = MigrationRequest::new(src, dst).validate().unwrap_err();
        assert!(matches!(err, Error::SameEndpoint(_)));
    }

    #[test]
    fn test_validate_allows_other_db_on_same_host() {
        let src = StoreEndpoint::new("localhost", 6379, 0);
        let dst = StoreEndpoint::new("localhost", 6379, 1);
        assert!(MigrationRequest::new(src, dst).validate().is_ok());
    }

    #[test]
    fn test_validate_page_size() {
        let (src, dst) = endpoints();
        let request = MigrationRequest::new(src, dst).with_page_size(0);
        assert!(matches!(request.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_concurrency() {
        let (src, dst) = endpoints();
        let options = MigrationOptions {
            concurrency: 0,
            ..Default::default()
        };
        let request = MigrationRequest::new(src, dst).with_options(options);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_hash_overwrite_mode_parse() {
        assert_eq!("FIELD".parse::<HashOverwriteMode>().unwrap(), HashOverwriteMode::Field);
        assert_eq!("key".parse::<HashOverwriteMode>().unwrap(), HashOverwriteMode::Key);
        assert!("merge".parse::<HashOverwriteMode>().is_err());
    }

    #[test]
    fn test_config_yaml_parse() {
        let yaml = r#"
mode: move
source: secret@10.1.1.4:6379/1
destination:
  host: 127.0.0.1
  db: 0
pattern: "user:*"
overwrite: true
hash_overwrite_mode: field
page_size: 500
options:
  concurrency: 8
  unsupported_type: skip
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode, MigrationMode::Move);
        assert_eq!(config.request.source.db, 1);
        assert_eq!(config.request.source.auth.as_deref(), Some("secret"));
        assert_eq!(config.request.destination.host, "127.0.0.1");
        assert_eq!(config.request.pattern, "user:*");
        assert!(config.request.overwrite);
        assert_eq!(config.request.hash_overwrite_mode, HashOverwriteMode::Field);
        assert_eq!(config.request.page_size, 500);
        assert_eq!(config.request.options.concurrency, 8);
        assert_eq!(
            config.request.options.unsupported_type,
            UnsupportedTypePolicy::Skip
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"source: 10.0.0.1\ndestination: 10.0.0.2/3\n")
            .unwrap();

        let config = MigrationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mode, MigrationMode::Copy);
        assert_eq!(config.request.pattern, "*");
        assert_eq!(config.request.page_size, 1000);
        assert_eq!(config.request.destination.db, 3);
    }

    #[test]
    fn test_config_from_missing_file() {
        let err = MigrationConfig::from_file(std::path::Path::new("/nonexistent/m.yaml"));
        assert!(matches!(err, Err(Error::Io(_))));
    }
}
