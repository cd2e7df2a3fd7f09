//! Error types for redis-migrate.

use thiserror::Error;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating keys.
#[derive(Error, Debug)]
pub enum Error {
    /// A store could not be reached or rejected the credentials.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Protocol failure while paging through the keyspace.
    #[error("Scan error: {0}")]
    Scan(String),

    /// The key holds a value type this tool cannot migrate.
    #[error("Unsupported type '{key_type}' for key '{key}'")]
    UnsupportedType {
        /// Key that was inspected.
        key: String,
        /// Type name reported by the store.
        key_type: String,
    },

    /// A read command failed.
    #[error("Read failed for key '{key}': {message}")]
    Read {
        /// Key being read.
        key: String,
        /// Store error message.
        message: String,
    },

    /// A write or delete command failed.
    #[error("Write failed for key '{key}': {message}")]
    Write {
        /// Key being written.
        key: String,
        /// Store error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address string could not be resolved into an endpoint.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// Address as supplied by the user.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Source and destination point at the same database.
    #[error("Source and destination cannot be equal ({0})")]
    SameEndpoint(String),

    /// The run was cancelled before the command completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// A store command did not answer in time.
    #[error("Command '{0}' timed out")]
    Timeout(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Builds a [`Error::Read`] from any displayable store error.
    pub fn read(key: &str, err: impl std::fmt::Display) -> Self {
        Self::Read {
            key: key.to_string(),
            message: err.to_string(),
        }
    }

    /// Builds a [`Error::Write`] from any displayable store error.
    pub fn write(key: &str, err: impl std::fmt::Display) -> Self {
        Self::Write {
            key: key.to_string(),
            message: err.to_string(),
        }
    }

    /// Returns true if this error must abort the whole run regardless of
    /// the per-key error policy.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnsupportedType { .. })
    }
}
