//! Keyspace enumeration.
//!
//! Move pages through the keyspace with `SCAN`. The cursor returned by one
//! page must be passed to the next, so pages are fetched strictly one after
//! another; [`KeyspaceScanner`] owns that cursor. Copy enumerates the whole
//! match set at once with `KEYS`.

use tracing::debug;

use crate::error::Result;
use crate::store::KeyValueStore;

/// One `SCAN` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Cursor for the next page. `0` means this was the last page.
    pub cursor: u64,
    /// Matching keys. May be empty even when more pages follow, and may
    /// repeat keys returned by earlier pages.
    pub keys: Vec<String>,
}

impl Page {
    /// True if no further pages follow.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.cursor == 0
    }
}

/// Fetches one page starting at `cursor` (0 starts a new iteration).
///
/// # Errors
///
/// Returns [`crate::Error::Scan`] on protocol failure.
pub async fn next_page(
    store: &dyn KeyValueStore,
    pattern: &str,
    cursor: u64,
    page_size: usize,
) -> Result<Page> {
    let (cursor, keys) = store.scan(cursor, pattern, page_size).await?;
    Ok(Page { cursor, keys })
}

/// Returns every key matching `pattern` in a single `KEYS` call.
///
/// # Errors
///
/// Returns [`crate::Error::Scan`] on protocol failure.
pub async fn enumerate(store: &dyn KeyValueStore, pattern: &str) -> Result<Vec<String>> {
    let keys = store.keys(pattern).await?;
    debug!("KEYS {} returned {} keys", pattern, keys.len());
    Ok(keys)
}

/// Cursor-threading iterator over `SCAN` pages.
pub struct KeyspaceScanner<'a> {
    store: &'a dyn KeyValueStore,
    pattern: &'a str,
    page_size: usize,
    cursor: u64,
    finished: bool,
}

impl<'a> KeyspaceScanner<'a> {
    /// Starts a new iteration over keys matching `pattern`.
    pub fn new(store: &'a dyn KeyValueStore, pattern: &'a str, page_size: usize) -> Self {
        Self {
            store,
            pattern,
            page_size,
            cursor: 0,
            finished: false,
        }
    }

    /// Fetches the next page, or `None` once the server returned cursor 0.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Scan`] on protocol failure. The scanner is
    /// left where it was, so the call may be retried.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.finished {
            return Ok(None);
        }
        let page = next_page(self.store, self.pattern, self.cursor, self.page_size).await?;
        debug!(
            "SCAN {} -> {} ({} keys)",
            self.cursor,
            page.cursor,
            page.keys.len()
        );
        self.cursor = page.cursor;
        self.finished = page.is_last();
        Ok(Some(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_next_page_returns_cursor_and_keys() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert_string(&format!("k:{i}"), "v");
        }

        let first = next_page(&store, "*", 0, 2).await.unwrap();
        assert_eq!(first.keys.len(), 2);
        assert!(!first.is_last());

        let second = next_page(&store, "*", first.cursor, 10).await.unwrap();
        assert_eq!(second.keys.len(), 3);
        assert!(second.is_last());
    }

    #[tokio::test]
    async fn test_scanner_threads_cursor() {
        let store = MemoryStore::new();
        for i in 0..7 {
            store.insert_string(&format!("k:{i}"), "v");
        }

        let mut scanner = KeyspaceScanner::new(&store, "*", 3);
        let mut pages = 0;
        let mut keys = Vec::new();
        while let Some(page) = scanner.next_page().await.unwrap() {
            pages += 1;
            keys.extend(page.keys);
        }

        assert_eq!(pages, 3);
        assert_eq!(keys.len(), 7);
        assert!(scanner.next_page().await.unwrap().is_none());
        assert_eq!(store.commands(), vec!["SCAN 0", "SCAN 4", "SCAN 7"]);
    }

    #[tokio::test]
    async fn test_scanner_empty_keyspace() {
        let store = MemoryStore::new();
        let mut scanner = KeyspaceScanner::new(&store, "*", 10);
        let page = scanner.next_page().await.unwrap().unwrap();
        assert!(page.keys.is_empty());
        assert!(page.is_last());
        assert!(scanner.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enumerate_uses_keys() {
        let store = MemoryStore::new();
        store.insert_string("user:1", "a");
        store.insert_string("order:1", "b");

        let keys = enumerate(&store, "user:*").await.unwrap();
        assert_eq!(keys, vec!["user:1"]);
        assert!(store.saw("KEYS", "user:*"));
    }

    #[tokio::test]
    async fn test_scan_failure() {
        let store = MemoryStore::new();
        store.fail_on("SCAN", "*");
        let mut scanner = KeyspaceScanner::new(&store, "*", 10);
        assert!(matches!(scanner.next_page().await, Err(Error::Scan(_))));
    }
}
