//! Key-value store capability consumed by the migration engine.
//!
//! The engine never talks to Redis directly; it drives a [`KeyValueStore`].
//! [`redis::RedisStore`] is the production implementation and
//! [`memory::MemoryStore`] an in-process one used by tests and benchmarks.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::endpoint::StoreEndpoint;
use crate::error::Result;

/// Value types the engine can migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Plain string value.
    String,
    /// Ordered list.
    List,
    /// Unordered set of members.
    Set,
    /// Sorted set of (member, score).
    ZSet,
    /// Field/value map.
    Hash,
}

impl KeyType {
    /// Parses a `TYPE` reply. Returns `None` for `none` and for types
    /// outside the supported five.
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "list" => Some(Self::List),
            "set" => Some(Self::Set),
            "zset" => Some(Self::ZSet),
            "hash" => Some(Self::Hash),
            _ => None,
        }
    }

    /// Name as reported by `TYPE`.
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::List => "list",
            Self::Set => "set",
            Self::ZSet => "zset",
            Self::Hash => "hash",
        }
    }

    /// Human-readable name used in listings.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::List => "List",
            Self::Set => "Set",
            Self::ZSet => "Sorted Set",
            Self::Hash => "Hash",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Remaining time to live as reported by `TTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key exists without an expiry (`-1`).
    Persistent,
    /// Key does not exist (`-2`), typically deleted mid-operation.
    Missing,
    /// Key expires in this many seconds.
    Expires(i64),
}

impl Ttl {
    /// Decodes a raw `TTL` reply.
    pub const fn from_reply(reply: i64) -> Self {
        match reply {
            -2 => Self::Missing,
            n if n < 0 => Self::Persistent,
            // A key that is about to expire still reports 0.
            0 => Self::Expires(1),
            n => Self::Expires(n),
        }
    }

    /// Encodes back into the `TTL` reply convention.
    pub const fn as_reply(self) -> i64 {
        match self {
            Self::Persistent => -1,
            Self::Missing => -2,
            Self::Expires(n) => n,
        }
    }

    /// Seconds to propagate with `EXPIRE`, if any.
    pub const fn expiry_seconds(self) -> Option<i64> {
        match self {
            Self::Expires(n) => Some(n),
            _ => None,
        }
    }
}

/// A value read from the source, in the shape needed to write it back.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    /// `GET` result.
    String(Vec<u8>),
    /// `LRANGE 0 -1` result, in list order.
    List(Vec<Vec<u8>>),
    /// `SMEMBERS` result.
    Set(Vec<Vec<u8>>),
    /// `ZRANGE 0 -1 WITHSCORES` result as (member, score).
    ZSet(Vec<(Vec<u8>, f64)>),
    /// `HGETALL` result as (field, value).
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
}

impl KeyValue {
    /// Type of this value.
    pub const fn key_type(&self) -> KeyType {
        match self {
            Self::String(_) => KeyType::String,
            Self::List(_) => KeyType::List,
            Self::Set(_) => KeyType::Set,
            Self::ZSet(_) => KeyType::ZSet,
            Self::Hash(_) => KeyType::Hash,
        }
    }

    /// Number of elements (bytes for strings).
    pub fn len(&self) -> usize {
        match self {
            Self::String(v) => v.len(),
            Self::List(v) | Self::Set(v) => v.len(),
            Self::ZSet(v) => v.len(),
            Self::Hash(v) => v.len(),
        }
    }

    /// True when the collection holds no elements. An empty string is a
    /// valid value and never reported as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(_) => false,
            _ => self.len() == 0,
        }
    }
}

/// Store commands the migration engine depends on.
///
/// Every method is one round trip, except [`KeyValueStore::key_info`] which
/// batches `TYPE` and `TTL` into a single pipelined request.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name for logging.
    fn backend(&self) -> &'static str;

    /// Connects and selects the endpoint's database.
    async fn connect(&mut self) -> Result<()>;

    /// `SCAN cursor MATCH pattern COUNT count`.
    ///
    /// Key names that are not valid UTF-8 are left out of the page.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    /// `KEYS pattern`. Blocks the server for the whole enumeration. Key
    /// names that are not valid UTF-8 are left out.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Raw `TYPE` name and `TTL` reply in one round trip.
    async fn key_info(&self, key: &str) -> Result<(String, i64)>;

    /// `EXISTS key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// `LRANGE key 0 -1`.
    async fn list_range(&self, key: &str) -> Result<Vec<Vec<u8>>>;

    /// `SMEMBERS key`.
    async fn set_members(&self, key: &str) -> Result<Vec<Vec<u8>>>;

    /// `ZRANGE key 0 -1 WITHSCORES`, as (member, score).
    async fn zset_range_with_scores(&self, key: &str) -> Result<Vec<(Vec<u8>, f64)>>;

    /// `HGETALL key`, as (field, value).
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// `HKEYS key`.
    async fn hash_keys(&self, key: &str) -> Result<Vec<Vec<u8>>>;

    /// `STRLEN`, `LLEN`, `SCARD`, `ZCARD` or `HLEN` depending on the type.
    async fn value_len(&self, key: &str, key_type: KeyType) -> Result<u64>;

    /// `SET key value`.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// `RPUSH key values...`. Returns the new list length.
    async fn list_push(&self, key: &str, values: &[Vec<u8>]) -> Result<u64>;

    /// `SADD key members...`. Returns the number of members added.
    async fn set_add(&self, key: &str, members: &[Vec<u8>]) -> Result<u64>;

    /// `ZADD key score member ...`, taking (score, member) pairs.
    async fn zset_add(&self, key: &str, entries: &[(f64, Vec<u8>)]) -> Result<u64>;

    /// `HSET key field value ...`.
    async fn hash_set_all(&self, key: &str, fields: &[(Vec<u8>, Vec<u8>)]) -> Result<()>;

    /// `HSETNX key field value`. Returns true if the field was written.
    async fn hash_set_if_absent(&self, key: &str, field: &[u8], value: &[u8]) -> Result<bool>;

    /// `HDEL key fields...`. Returns the number of fields removed.
    async fn hash_delete_fields(&self, key: &str, fields: &[Vec<u8>]) -> Result<u64>;

    /// `DEL key`. Returns the number of keys removed.
    async fn delete(&self, key: &str) -> Result<u64>;

    /// `EXPIRE key seconds`. Returns true if the timeout was set.
    async fn expire(&self, key: &str, seconds: i64) -> Result<bool>;

    /// Closes the connection. Later commands fail.
    async fn close(&mut self) -> Result<()>;
}

/// Creates and connects a Redis store for the endpoint.
///
/// # Errors
///
/// Returns [`crate::Error::Connection`] if the server is unreachable or
/// rejects the credentials.
pub async fn open_store(
    endpoint: &StoreEndpoint,
    command_timeout: Option<Duration>,
) -> Result<Box<dyn KeyValueStore>> {
    let mut store = self::redis::RedisStore::new(endpoint.clone(), command_timeout);
    store.connect().await?;
    Ok(Box::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_type_from_type_name() {
        assert_eq!(KeyType::from_type_name("zset"), Some(KeyType::ZSet));
        assert_eq!(KeyType::from_type_name("hash"), Some(KeyType::Hash));
        assert_eq!(KeyType::from_type_name("none"), None);
        assert_eq!(KeyType::from_type_name("stream"), None);
    }

    #[test]
    fn test_ttl_from_reply() {
        assert_eq!(Ttl::from_reply(-1), Ttl::Persistent);
        assert_eq!(Ttl::from_reply(-2), Ttl::Missing);
        assert_eq!(Ttl::from_reply(300), Ttl::Expires(300));
        assert_eq!(Ttl::from_reply(300).expiry_seconds(), Some(300));
        assert_eq!(Ttl::Persistent.expiry_seconds(), None);
        assert_eq!(Ttl::Missing.expiry_seconds(), None);
    }

    #[test]
    fn test_key_value_emptiness() {
        assert!(!KeyValue::String(Vec::new()).is_empty());
        assert!(KeyValue::List(Vec::new()).is_empty());
        assert!(KeyValue::Hash(Vec::new()).is_empty());
        assert_eq!(KeyValue::ZSet(vec![(b"x".to_vec(), 5.0)]).len(), 1);
        assert_eq!(KeyValue::Set(vec![b"a".to_vec()]).key_type(), KeyType::Set);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(KeyType::ZSet.display_name(), "Sorted Set");
        assert_eq!(KeyType::ZSet.to_string(), "zset");
    }
}
