//! Key type and TTL inspection.

use crate::error::{Error, Result};
use crate::store::{KeyType, KeyValueStore, Ttl};

/// Type name `TYPE` reports for a key that does not exist.
pub const MISSING_TYPE: &str = "none";

/// Resolves the type and remaining TTL of `key` in one round trip.
///
/// # Errors
///
/// Returns [`Error::UnsupportedType`] when the key is missing (`none`) or
/// holds a type other than string, list, set, zset or hash. Store failures
/// are returned as [`Error::Read`].
pub async fn inspect(store: &dyn KeyValueStore, key: &str) -> Result<(KeyType, Ttl)> {
    let (type_name, ttl) = store.key_info(key).await?;
    let key_type = KeyType::from_type_name(&type_name).ok_or_else(|| Error::UnsupportedType {
        key: key.to_string(),
        key_type: type_name,
    })?;
    Ok((key_type, Ttl::from_reply(ttl)))
}

/// True when `err` reports a key that vanished before it could be inspected.
pub fn is_missing_key(err: &Error) -> bool {
    matches!(err, Error::UnsupportedType { key_type, .. } if key_type == MISSING_TYPE)
}
