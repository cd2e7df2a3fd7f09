// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # Redis Migration Tool
//!
//! `redis-migrate` is a CLI tool and library for copying, moving, deleting,
//! listing and counting Redis keys that match a glob pattern.
//!
//! ## Supported Types
//!
//! | Type | Read | Write |
//! |------|------|-------|
//! | string | `GET` | `SET` |
//! | list | `LRANGE 0 -1` | `RPUSH` |
//! | set | `SMEMBERS` | `SADD` |
//! | zset | `ZRANGE 0 -1 WITHSCORES` | `ZADD` |
//! | hash | `HGETALL` | `HSET` / `HSETNX` |
//!
//! Keys of any other type are rejected, or skipped with
//! `unsupported_type: skip`.
//!
//! ## Quick Start
//!
//! ```bash
//! # Copy all user keys between instances
//! redis-migrate copy 10.0.0.1 10.0.0.2/1 --pattern 'user:*'
//!
//! # Move, merging hashes field by field
//! redis-migrate move secret@10.0.0.1:6380 10.0.0.2 -m field
//!
//! # Run a migration described in a file
//! redis-migrate run --config migration.yaml
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! mode: move
//! source: secret@10.0.0.1:6379/0
//! destination: 10.0.0.2:6379/1
//! pattern: "session:*"
//! overwrite: false
//! hash_overwrite_mode: field
//! page_size: 1000
//!
//! options:
//!   concurrency: 8
//!   unsupported_type: skip
//! ```

#![warn(missing_docs)]

pub mod commands;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod inspector;
pub mod pipeline;
pub mod scanner;
pub mod store;
pub mod transfer;

pub use commands::KeyListing;
pub use config::{
    HashOverwriteMode, MigrationConfig, MigrationMode, MigrationOptions, MigrationRequest,
    UnsupportedTypePolicy,
};
pub use endpoint::StoreEndpoint;
pub use error::{Error, Result};
pub use pipeline::{MigrationResult, Migrator};
pub use store::{open_store, KeyType, KeyValue, KeyValueStore, Ttl};
pub use transfer::{KeyRecord, TransferAction, TransferEngine, TransferOutcome};
