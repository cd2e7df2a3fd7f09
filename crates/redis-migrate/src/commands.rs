//! Single-endpoint operations: delete, list and count.

use std::fmt;
use tracing::{debug, info};

use crate::error::Result;
use crate::inspector::inspect;
use crate::scanner::enumerate;
use crate::store::{KeyType, KeyValueStore, Ttl};

/// Deletes every key matching `pattern`, one `DEL` at a time.
///
/// Returns the number of keys the server reported as removed, which may be
/// lower than the number enumerated if keys vanished meanwhile.
///
/// # Errors
///
/// Stops at the first failing `DEL`; keys deleted before it stay deleted.
pub async fn delete(store: &dyn KeyValueStore, pattern: &str) -> Result<u64> {
    let keys = enumerate(store, pattern).await?;
    info!("Deleting {} keys matching '{}'", keys.len(), pattern);

    let mut deleted = 0;
    for key in &keys {
        debug!("Deleting key {}", key);
        deleted += store.delete(key).await?;
    }
    Ok(deleted)
}

/// Counts keys matching `pattern`.
///
/// # Errors
///
/// Returns [`crate::Error::Scan`] on protocol failure.
pub async fn count(store: &dyn KeyValueStore, pattern: &str) -> Result<u64> {
    Ok(enumerate(store, pattern).await?.len() as u64)
}

/// One key as shown by `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyListing {
    /// The key.
    pub key: String,
    /// Its type.
    pub key_type: KeyType,
    /// Remaining TTL.
    pub ttl: Ttl,
    /// Byte length for strings, element count otherwise.
    pub length: u64,
    /// Field names, for hashes.
    pub fields: Vec<String>,
}

impl fmt::Display for KeyListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (length: {}): {} (TTL: {})",
            self.key_type.display_name(),
            self.length,
            self.key,
            self.ttl.as_reply()
        )?;
        for (index, field) in self.fields.iter().enumerate() {
            write!(f, "\n  {index}) {field}")?;
        }
        Ok(())
    }
}

/// Describes every key matching `pattern`, sorted by key.
///
/// # Errors
///
/// Returns [`crate::Error::UnsupportedType`] at the first key of a type
/// outside the supported five, or the first store error.
pub async fn list(store: &dyn KeyValueStore, pattern: &str) -> Result<Vec<KeyListing>> {
    let mut keys = enumerate(store, pattern).await?;
    keys.sort();

    let mut listings = Vec::with_capacity(keys.len());
    for key in keys {
        let (key_type, ttl) = inspect(store, &key).await?;
        let (length, fields) = match key_type {
            KeyType::Hash => {
                let fields: Vec<String> = store
                    .hash_keys(&key)
                    .await?
                    .iter()
                    .map(|f| String::from_utf8_lossy(f).into_owned())
                    .collect();
                (fields.len() as u64, fields)
            }
            other => (store.value_len(&key, other).await?, Vec::new()),
        };
        listings.push(KeyListing {
            key,
            key_type,
            ttl,
            length,
            fields,
        });
    }
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_delete_matching_keys() {
        let store = MemoryStore::new();
        store.insert_string("tmp:1", "a");
        store.insert_list("tmp:2", ["x"]);
        store.insert_string("keep", "b");

        assert_eq!(delete(&store, "tmp:*").await.unwrap(), 2);
        assert!(!store.contains("tmp:1"));
        assert!(!store.contains("tmp:2"));
        assert!(store.contains("keep"));
    }

    #[tokio::test]
    async fn test_delete_nothing_matches() {
        let store = MemoryStore::new();
        store.insert_string("keep", "b");
        assert_eq!(delete(&store, "tmp:*").await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_stops_at_first_failure() {
        let store = MemoryStore::new();
        store.insert_string("a", "1");
        store.insert_string("b", "2");
        store.insert_string("c", "3");
        store.fail_on("DEL", "b");

        let err = delete(&store, "*").await.unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert!(store.contains("c"));
        assert!(!store.saw("DEL", "c"));
    }

    #[tokio::test]
    async fn test_count() {
        let store = MemoryStore::new();
        store.insert_string("user:1", "a");
        store.insert_string("user:2", "b");
        store.insert_string("order:1", "c");
        assert_eq!(count(&store, "user:*").await.unwrap(), 2);
        assert_eq!(count(&store, "*").await.unwrap(), 3);
        assert_eq!(count(&store, "none:*").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_sorted_with_lengths() {
        let store = MemoryStore::new();
        store.insert_zset("b:z", [("m", 1.0), ("n", 2.0)]);
        store.insert_string("a:s", "hello");
        store.set_ttl("a:s", 42);
        store.insert_hash("c:h", [("f1", "1"), ("f2", "2")]);

        let listings = list(&store, "*").await.unwrap();
        let keys: Vec<&str> = listings.iter().map(|l| l.key.as_str()).collect();
        assert_eq!(keys, vec!["a:s", "b:z", "c:h"]);

        assert_eq!(listings[0].length, 5);
        assert_eq!(listings[0].ttl, Ttl::Expires(42));
        assert_eq!(listings[1].key_type, KeyType::ZSet);
        assert_eq!(listings[1].length, 2);
        assert_eq!(listings[2].fields, vec!["f1", "f2"]);
    }

    #[tokio::test]
    async fn test_list_rejects_unsupported_type() {
        let store = MemoryStore::new();
        store.insert_string("a", "1");
        store.insert_unsupported("b", "stream");

        let err = list(&store, "*").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { .. }));
    }

    #[test]
    fn test_listing_display() {
        let listing = KeyListing {
            key: "user:1".to_string(),
            key_type: KeyType::ZSet,
            ttl: Ttl::Persistent,
            length: 3,
            fields: Vec::new(),
        };
        assert_eq!(listing.to_string(), "Sorted Set (length: 3): user:1 (TTL: -1)");

        let hash = KeyListing {
            key: "h".to_string(),
            key_type: KeyType::Hash,
            ttl: Ttl::Expires(10),
            length: 2,
            fields: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            hash.to_string(),
            "Hash (length: 2): h (TTL: 10)\n  0) a\n  1) b"
        );
    }
}
