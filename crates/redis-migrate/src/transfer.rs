//! Per-key transfer from source to destination.
//!
//! A transfer runs these steps in order, each depending on the previous one:
//!
//! 1. inspect type and TTL at the source, concurrently with `EXISTS` at the
//!    destination;
//! 2. decide whether to fetch, and fetch the value once;
//! 3. clear the destination when overwriting;
//! 4. write the value in its type-specific form;
//! 5. in move mode, delete the source once something was written;
//! 6. propagate the source TTL to a destination key that did not exist.
//!
//! Each step produces a new [`KeyRecord`]; nothing is shared between
//! concurrent transfers except the store handles.

use futures::future::try_join_all;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{HashOverwriteMode, MigrationRequest};
use crate::error::{Error, Result};
use crate::inspector::{inspect, is_missing_key};
use crate::store::{KeyType, KeyValue, KeyValueStore, Ttl};

/// Everything learned about one key so far.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRecord {
    /// The key.
    pub key: String,
    /// Type at the source.
    pub key_type: KeyType,
    /// TTL at the source when inspected.
    pub ttl: Ttl,
    /// Whether the key existed at the destination before the write.
    pub exists_at_destination: bool,
    /// Value read from the source, once fetched.
    pub value: Option<KeyValue>,
}

impl KeyRecord {
    /// Record after inspection, before any value is fetched.
    pub fn inspected(key: &str, key_type: KeyType, ttl: Ttl, exists_at_destination: bool) -> Self {
        Self {
            key: key.to_string(),
            key_type,
            ttl,
            exists_at_destination,
            value: None,
        }
    }

    /// Same record carrying the fetched value.
    #[must_use]
    pub fn with_value(self, value: Option<KeyValue>) -> Self {
        Self { value, ..self }
    }
}

/// Why a key was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Destination already holds the key and overwrite is off.
    ExistsAtDestination,
    /// Field merge found every source field already present.
    NoNewFields,
    /// Key disappeared from the source or had nothing to write.
    Vanished,
}

/// What happened to one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    /// Value written to the destination.
    Written,
    /// Nothing written.
    Skipped(SkipReason),
}

/// Result of transferring one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// The key.
    pub key: String,
    /// What happened.
    pub action: TransferAction,
    /// Hash fields written, for hash keys that were written.
    pub fields_written: Option<u64>,
    /// Whether the source key was deleted.
    pub source_deleted: bool,
}

impl TransferOutcome {
    fn skipped(key: &str, reason: SkipReason) -> Self {
        Self {
            key: key.to_string(),
            action: TransferAction::Skipped(reason),
            fields_written: None,
            source_deleted: false,
        }
    }

    /// True if the value reached the destination.
    #[must_use]
    pub const fn moved(&self) -> bool {
        matches!(self.action, TransferAction::Written)
    }
}

/// How the destination is prepared before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cleanup {
    None,
    DeleteKey,
    DeleteFields,
}

/// Transfers single keys between two stores.
pub struct TransferEngine<'a> {
    source: &'a dyn KeyValueStore,
    destination: &'a dyn KeyValueStore,
    request: &'a MigrationRequest,
    delete_source: bool,
    cancel: CancellationToken,
}

impl<'a> TransferEngine<'a> {
    /// Creates an engine. `delete_source` selects move semantics.
    pub fn new(
        source: &'a dyn KeyValueStore,
        destination: &'a dyn KeyValueStore,
        request: &'a MigrationRequest,
        delete_source: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            destination,
            request,
            delete_source,
            cancel,
        }
    }

    async fn guarded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res,
        }
    }

    /// Transfers one key.
    ///
    /// A key that vanished from the source is skipped, so re-processing a
    /// key that `SCAN` returned twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedType`] for keys of other types, the first
    /// store error of any step, or [`Error::Cancelled`].
    pub async fn transfer(&self, key: &str) -> Result<TransferOutcome> {
        let record = match self.inspect(key).await {
            Ok(record) => record,
            Err(err) if is_missing_key(&err) => {
                debug!("Key {} no longer exists at source", key);
                return Ok(TransferOutcome::skipped(key, SkipReason::Vanished));
            }
            Err(err) => return Err(err),
        };

        if !self.should_fetch(&record) {
            debug!("Skipping key {}", key);
            return Ok(TransferOutcome::skipped(key, SkipReason::ExistsAtDestination));
        }

        debug!("Getting data for key {} from source", key);
        let value = self.fetch(&record).await?;
        let record = record.with_value(value);
        let Some(value) = record.value.as_ref().filter(|v| !v.is_empty()) else {
            debug!("Key {} has no data at source", key);
            return Ok(TransferOutcome::skipped(key, SkipReason::Vanished));
        };

        self.prepare_destination(&record, value).await?;

        let fields_written = self.write(&record, value).await?;
        if fields_written == Some(0) {
            debug!("No new fields written for hash {}", key);
            return Ok(TransferOutcome::skipped(key, SkipReason::NoNewFields));
        }

        let source_deleted = if self.delete_source {
            debug!("Deleting key {} from source", key);
            self.guarded(self.source.delete(key)).await?;
            true
        } else {
            false
        };

        // An existing destination key keeps its own expiry.
        if !record.exists_at_destination {
            if let Some(seconds) = record.ttl.expiry_seconds() {
                debug!("Setting TTL of {}s on key {}", seconds, key);
                self.guarded(self.destination.expire(key, seconds)).await?;
            }
        }

        Ok(TransferOutcome {
            key: record.key,
            action: TransferAction::Written,
            fields_written,
            source_deleted,
        })
    }

    async fn inspect(&self, key: &str) -> Result<KeyRecord> {
        let ((key_type, ttl), exists) = self
            .guarded(async {
                tokio::try_join!(inspect(self.source, key), self.destination.exists(key))
            })
            .await?;
        Ok(KeyRecord::inspected(key, key_type, ttl, exists))
    }

    fn should_fetch(&self, record: &KeyRecord) -> bool {
        !record.exists_at_destination
            || self.request.overwrite
            || (record.key_type == KeyType::Hash
                && self.request.hash_overwrite_mode == HashOverwriteMode::Field)
    }

    async fn fetch(&self, record: &KeyRecord) -> Result<Option<KeyValue>> {
        let source = self.source;
        let key = record.key.as_str();
        let value = match record.key_type {
            KeyType::String => self.guarded(source.get(key)).await?.map(KeyValue::String),
            KeyType::List => Some(KeyValue::List(self.guarded(source.list_range(key)).await?)),
            KeyType::Set => Some(KeyValue::Set(self.guarded(source.set_members(key)).await?)),
            KeyType::ZSet => Some(KeyValue::ZSet(
                self.guarded(source.zset_range_with_scores(key)).await?,
            )),
            KeyType::Hash => Some(KeyValue::Hash(self.guarded(source.hash_get_all(key)).await?)),
        };
        Ok(value)
    }

    fn cleanup(&self, record: &KeyRecord) -> Cleanup {
        if !record.exists_at_destination || !self.request.overwrite {
            return Cleanup::None;
        }
        match (record.key_type, self.request.hash_overwrite_mode) {
            (KeyType::Hash, HashOverwriteMode::Field) => Cleanup::DeleteFields,
            _ => Cleanup::DeleteKey,
        }
    }

    async fn prepare_destination(&self, record: &KeyRecord, value: &KeyValue) -> Result<()> {
        let key = record.key.as_str();
        match (self.cleanup(record), value) {
            (Cleanup::None, _) => {}
            (Cleanup::DeleteFields, KeyValue::Hash(fields)) => {
                debug!("Removing {} fields from hash {} at destination", fields.len(), key);
                let names: Vec<Vec<u8>> = fields.iter().map(|(f, _)| f.clone()).collect();
                self.guarded(self.destination.hash_delete_fields(key, &names))
                    .await?;
            }
            (Cleanup::DeleteKey | Cleanup::DeleteFields, _) => {
                debug!("Removing key {} from destination", key);
                self.guarded(self.destination.delete(key)).await?;
            }
        }
        Ok(())
    }

    /// Writes the value. Returns the number of fields written for hashes.
    async fn write(&self, record: &KeyRecord, value: &KeyValue) -> Result<Option<u64>> {
        let dst = self.destination;
        let key = record.key.as_str();
        debug!("Writing {} of length {} to key {}", value.key_type(), value.len(), key);
        match value {
            KeyValue::String(v) => {
                self.guarded(dst.set(key, v)).await?;
            }
            KeyValue::List(items) => {
                self.guarded(dst.list_push(key, items)).await?;
            }
            KeyValue::Set(members) => {
                self.guarded(dst.set_add(key, members)).await?;
            }
            KeyValue::ZSet(entries) => {
                let scored: Vec<(f64, Vec<u8>)> =
                    entries.iter().map(|(m, s)| (*s, m.clone())).collect();
                self.guarded(dst.zset_add(key, &scored)).await?;
            }
            KeyValue::Hash(fields) => return self.write_hash(key, fields).await.map(Some),
        }
        Ok(None)
    }

    async fn write_hash(&self, key: &str, fields: &[(Vec<u8>, Vec<u8>)]) -> Result<u64> {
        let dst = self.destination;
        let merge = self.request.hash_overwrite_mode == HashOverwriteMode::Field
            && !self.request.overwrite;
        if !merge {
            debug!("Writing {} hash fields for key {}", fields.len(), key);
            self.guarded(dst.hash_set_all(key, fields)).await?;
            return Ok(fields.len() as u64);
        }

        debug!("Merging {} hash fields into key {}", fields.len(), key);
        let written = self
            .guarded(try_join_all(
                fields
                    .iter()
                    .map(|(field, value)| dst.hash_set_if_absent(key, field, value)),
            ))
            .await?;
        Ok(written.into_iter().filter(|w| *w).count() as u64)
    }
}

#[cfg(test)]
#[path = "transfer_tests.rs"]
mod tests;
