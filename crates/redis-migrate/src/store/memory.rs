//! In-process store with Redis semantics for the commands the engine uses.
//!
//! Clones share state, so a test can hand one clone to the engine and keep
//! another to seed keys and inspect the result. TTLs are recorded and
//! reported but never expire on their own. Every command is appended to a
//! log, and individual commands can be made to fail.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::{KeyType, KeyValue, KeyValueStore};
use crate::error::{Error, Result};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Stored {
    String(Vec<u8>),
    List(Vec<Vec<u8>>),
    Set(BTreeSet<Vec<u8>>),
    ZSet(BTreeMap<Vec<u8>, f64>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    /// A type the engine does not migrate, such as `stream`.
    Other(String),
}

impl Stored {
    fn type_name(&self) -> &str {
        match self {
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::ZSet(_) => "zset",
            Self::Hash(_) => "hash",
            Self::Other(name) => name,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::String(_) | Self::Other(_) => false,
            Self::List(v) => v.is_empty(),
            Self::Set(v) => v.is_empty(),
            Self::ZSet(v) => v.is_empty(),
            Self::Hash(v) => v.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    value: Stored,
    ttl: Option<i64>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Creation order; the scan cursor is a position in this sequence.
    order: BTreeMap<u64, String>,
    next_seq: u64,
    closed: bool,
    yielding: bool,
    failures: HashSet<(String, String)>,
    log: Vec<String>,
}

impl State {
    fn check(&mut self, command: &str, key: &str) -> Result<()> {
        self.log.push(format!("{command} {key}"));
        if self.closed {
            return Err(Error::Connection("store is closed".to_string()));
        }
        let injected = self.failures.contains(&(command.to_string(), key.to_string()))
            || self.failures.contains(&(command.to_string(), "*".to_string()));
        if injected {
            let message = format!("injected failure for {command}");
            return Err(match command {
                "SCAN" | "KEYS" => Error::Scan(message),
                "TYPE+TTL" | "EXISTS" | "GET" | "LRANGE" | "SMEMBERS" | "ZRANGE" | "HGETALL"
                | "HKEYS" | "LEN" => Error::read(key, message),
                _ => Error::write(key, message),
            });
        }
        Ok(())
    }

    fn put(&mut self, key: &str, value: Stored) {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.ttl = None;
            }
            None => {
                self.next_seq += 1;
                let seq = self.next_seq;
                self.order.insert(seq, key.to_string());
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        seq,
                        value,
                        ttl: None,
                    },
                );
            }
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                true
            }
            None => false,
        }
    }

    /// Existing value of the expected kind, or a fresh one to fill.
    fn take_or<F>(&mut self, key: &str, fresh: Stored, accept: F) -> Result<Stored>
    where
        F: Fn(&Stored) -> bool,
    {
        match self.entries.get(key) {
            Some(entry) if accept(&entry.value) => Ok(entry.value.clone()),
            Some(_) => Err(Error::write(key, WRONGTYPE)),
            None => Ok(fresh),
        }
    }

    /// Stores a collection after a write, keeping its TTL.
    fn store_collection(&mut self, key: &str, value: Stored) {
        if value.is_empty() {
            self.remove(key);
            return;
        }
        match self.entries.get_mut(key) {
            Some(entry) => entry.value = value,
            None => self.put(key, value),
        }
    }

    fn read(&self, key: &str) -> Option<&Stored> {
        self.entries.get(key).map(|e| &e.value)
    }
}

/// In-memory [`KeyValueStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a string key.
    pub fn insert_string(&self, key: &str, value: impl Into<Vec<u8>>) {
        self.state.lock().put(key, Stored::String(value.into()));
    }

    /// Seeds a list key, elements in order.
    pub fn insert_list<I, V>(&self, key: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.state.lock().put(key, Stored::List(values));
    }

    /// Seeds a set key.
    pub fn insert_set<I, V>(&self, key: &str, members: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        let members = members.into_iter().map(Into::into).collect();
        self.state.lock().put(key, Stored::Set(members));
    }

    /// Seeds a sorted-set key from (member, score) pairs.
    pub fn insert_zset<I, V>(&self, key: &str, entries: I)
    where
        I: IntoIterator<Item = (V, f64)>,
        V: Into<Vec<u8>>,
    {
        let entries = entries.into_iter().map(|(m, s)| (m.into(), s)).collect();
        self.state.lock().put(key, Stored::ZSet(entries));
    }

    /// Seeds a hash key from (field, value) pairs.
    pub fn insert_hash<I, F, V>(&self, key: &str, fields: I)
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let fields = fields
            .into_iter()
            .map(|(f, v)| (f.into(), v.into()))
            .collect();
        self.state.lock().put(key, Stored::Hash(fields));
    }

    /// Seeds a key whose `TYPE` is outside the supported set.
    pub fn insert_unsupported(&self, key: &str, type_name: &str) {
        self.state
            .lock()
            .put(key, Stored::Other(type_name.to_string()));
    }

    /// Sets a TTL on an existing key without logging a command.
    pub fn set_ttl(&self, key: &str, seconds: i64) {
        if let Some(entry) = self.state.lock().entries.get_mut(key) {
            entry.ttl = Some(seconds);
        }
    }

    /// Current value, in engine form. `None` if absent or unsupported.
    pub fn value(&self, key: &str) -> Option<KeyValue> {
        let state = self.state.lock();
        match state.read(key)? {
            Stored::String(v) => Some(KeyValue::String(v.clone())),
            Stored::List(v) => Some(KeyValue::List(v.clone())),
            Stored::Set(v) => Some(KeyValue::Set(v.iter().cloned().collect())),
            Stored::ZSet(v) => Some(KeyValue::ZSet(sorted_by_score(v))),
            Stored::Hash(v) => Some(KeyValue::Hash(
                v.iter().map(|(f, v)| (f.clone(), v.clone())).collect(),
            )),
            Stored::Other(_) => None,
        }
    }

    /// Raw `TTL` reply for the key.
    pub fn ttl(&self, key: &str) -> i64 {
        let state = self.state.lock();
        match state.entries.get(key) {
            Some(entry) => entry.ttl.unwrap_or(-1),
            None => -2,
        }
    }

    /// Whether the key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes `command` fail for `key` (`"*"` for any key). Command names
    /// follow the log: `GET`, `SET`, `DEL`, `TYPE+TTL`, `SCAN`, ...
    pub fn fail_on(&self, command: &str, key: &str) {
        self.state
            .lock()
            .failures
            .insert((command.to_string(), key.to_string()));
    }

    /// Commands issued so far, as `"COMMAND key"`.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Whether a command was issued for the key.
    pub fn saw(&self, command: &str, key: &str) -> bool {
        let needle = format!("{command} {key}");
        self.state.lock().log.iter().any(|c| *c == needle)
    }

    /// Whether [`KeyValueStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Yields to the runtime before every command, so concurrent transfers
    /// interleave the way they do against a real server.
    pub fn set_yielding(&self, yielding: bool) {
        self.state.lock().yielding = yielding;
    }

    async fn pause(&self) {
        let yielding = self.state.lock().yielding;
        if yielding {
            tokio::task::yield_now().await;
        }
    }
}

fn sorted_by_score(entries: &BTreeMap<Vec<u8>, f64>) -> Vec<(Vec<u8>, f64)> {
    let mut out: Vec<_> = entries.iter().map(|(m, s)| (m.clone(), *s)).collect();
    out.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    out
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn connect(&mut self) -> Result<()> {
        self.state.lock().closed = false;
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("SCAN", &cursor.to_string())?;

        let mut window = state.order.range(cursor..);
        let mut keys = Vec::new();
        for (_, key) in window.by_ref().take(count.max(1)) {
            if glob_match(pattern.as_bytes(), key.as_bytes()) {
                keys.push(key.clone());
            }
        }
        let next = window.next().map_or(0, |(seq, _)| *seq);
        Ok((next, keys))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("KEYS", pattern)?;
        Ok(state
            .order
            .values()
            .filter(|k| glob_match(pattern.as_bytes(), k.as_bytes()))
            .cloned()
            .collect())
    }

    async fn key_info(&self, key: &str) -> Result<(String, i64)> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("TYPE+TTL", key)?;
        Ok(match state.entries.get(key) {
            Some(entry) => (
                entry.value.type_name().to_string(),
                entry.ttl.unwrap_or(-1),
            ),
            None => ("none".to_string(), -2),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("EXISTS", key)?;
        Ok(state.entries.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("GET", key)?;
        match state.read(key) {
            None => Ok(None),
            Some(Stored::String(v)) => Ok(Some(v.clone())),
            Some(_) => Err(Error::read(key, WRONGTYPE)),
        }
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("LRANGE", key)?;
        match state.read(key) {
            None => Ok(Vec::new()),
            Some(Stored::List(v)) => Ok(v.clone()),
            Some(_) => Err(Error::read(key, WRONGTYPE)),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("SMEMBERS", key)?;
        match state.read(key) {
            None => Ok(Vec::new()),
            Some(Stored::Set(v)) => Ok(v.iter().cloned().collect()),
            Some(_) => Err(Error::read(key, WRONGTYPE)),
        }
    }

    async fn zset_range_with_scores(&self, key: &str) -> Result<Vec<(Vec<u8>, f64)>> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("ZRANGE", key)?;
        match state.read(key) {
            None => Ok(Vec::new()),
            Some(Stored::ZSet(v)) => Ok(sorted_by_score(v)),
            Some(_) => Err(Error::read(key, WRONGTYPE)),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("HGETALL", key)?;
        match state.read(key) {
            None => Ok(Vec::new()),
            Some(Stored::Hash(v)) => Ok(v.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
            Some(_) => Err(Error::read(key, WRONGTYPE)),
        }
    }

    async fn hash_keys(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("HKEYS", key)?;
        match state.read(key) {
            None => Ok(Vec::new()),
            Some(Stored::Hash(v)) => Ok(v.keys().cloned().collect()),
            Some(_) => Err(Error::read(key, WRONGTYPE)),
        }
    }

    async fn value_len(&self, key: &str, key_type: KeyType) -> Result<u64> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("LEN", key)?;
        let len = match (state.read(key), key_type) {
            (None, _) => 0,
            (Some(Stored::String(v)), KeyType::String) => v.len(),
            (Some(Stored::List(v)), KeyType::List) => v.len(),
            (Some(Stored::Set(v)), KeyType::Set) => v.len(),
            (Some(Stored::ZSet(v)), KeyType::ZSet) => v.len(),
            (Some(Stored::Hash(v)), KeyType::Hash) => v.len(),
            _ => return Err(Error::read(key, WRONGTYPE)),
        };
        Ok(len as u64)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("SET", key)?;
        state.put(key, Stored::String(value.to_vec()));
        Ok(())
    }

    async fn list_push(&self, key: &str, values: &[Vec<u8>]) -> Result<u64> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("RPUSH", key)?;
        if values.is_empty() {
            return Err(Error::write(key, "ERR wrong number of arguments for 'rpush'"));
        }
        let Stored::List(mut list) =
            state.take_or(key, Stored::List(Vec::new()), |v| matches!(v, Stored::List(_)))?
        else {
            return Err(Error::write(key, WRONGTYPE));
        };
        list.extend(values.iter().cloned());
        let len = list.len() as u64;
        state.store_collection(key, Stored::List(list));
        Ok(len)
    }

    async fn set_add(&self, key: &str, members: &[Vec<u8>]) -> Result<u64> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("SADD", key)?;
        if members.is_empty() {
            return Err(Error::write(key, "ERR wrong number of arguments for 'sadd'"));
        }
        let Stored::Set(mut set) =
            state.take_or(key, Stored::Set(BTreeSet::new()), |v| matches!(v, Stored::Set(_)))?
        else {
            return Err(Error::write(key, WRONGTYPE));
        };
        let added = members.iter().filter(|m| set.insert((*m).clone())).count();
        state.store_collection(key, Stored::Set(set));
        Ok(added as u64)
    }

    async fn zset_add(&self, key: &str, entries: &[(f64, Vec<u8>)]) -> Result<u64> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("ZADD", key)?;
        if entries.is_empty() {
            return Err(Error::write(key, "ERR wrong number of arguments for 'zadd'"));
        }
        if entries.iter().any(|(score, _)| score.is_nan()) {
            return Err(Error::write(key, "ERR value is not a valid float"));
        }
        let Stored::ZSet(mut zset) =
            state.take_or(key, Stored::ZSet(BTreeMap::new()), |v| matches!(v, Stored::ZSet(_)))?
        else {
            return Err(Error::write(key, WRONGTYPE));
        };
        let added = entries
            .iter()
            .filter(|(score, member)| zset.insert(member.clone(), *score).is_none())
            .count();
        state.store_collection(key, Stored::ZSet(zset));
        Ok(added as u64)
    }

    async fn hash_set_all(&self, key: &str, fields: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("HSET", key)?;
        if fields.is_empty() {
            return Err(Error::write(key, "ERR wrong number of arguments for 'hset'"));
        }
        let Stored::Hash(mut hash) =
            state.take_or(key, Stored::Hash(BTreeMap::new()), |v| matches!(v, Stored::Hash(_)))?
        else {
            return Err(Error::write(key, WRONGTYPE));
        };
        hash.extend(fields.iter().cloned());
        state.store_collection(key, Stored::Hash(hash));
        Ok(())
    }

    async fn hash_set_if_absent(&self, key: &str, field: &[u8], value: &[u8]) -> Result<bool> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("HSETNX", key)?;
        let Stored::Hash(mut hash) =
            state.take_or(key, Stored::Hash(BTreeMap::new()), |v| matches!(v, Stored::Hash(_)))?
        else {
            return Err(Error::write(key, WRONGTYPE));
        };
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_vec(), value.to_vec());
        state.store_collection(key, Stored::Hash(hash));
        Ok(true)
    }

    async fn hash_delete_fields(&self, key: &str, fields: &[Vec<u8>]) -> Result<u64> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("HDEL", key)?;
        let mut hash = match state.read(key) {
            None => return Ok(0),
            Some(Stored::Hash(hash)) => hash.clone(),
            Some(_) => return Err(Error::write(key, WRONGTYPE)),
        };
        let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
        state.store_collection(key, Stored::Hash(hash));
        Ok(removed as u64)
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("DEL", key)?;
        Ok(u64::from(state.remove(key)))
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<bool> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check("EXPIRE", key)?;
        if !state.entries.contains_key(key) {
            return Ok(false);
        }
        if seconds <= 0 {
            state.remove(key);
            return Ok(true);
        }
        if let Some(entry) = state.entries.get_mut(key) {
            entry.ttl = Some(seconds);
        }
        Ok(true)
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Redis-style glob matching: `*`, `?`, `[abc]`, `[^a-z]` and `\` escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Backtrack point for the most recent `*`.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    while p < pattern.len() && pattern[p] == b'*' {
                        p += 1;
                    }
                    if p == pattern.len() {
                        return true;
                    }
                    star = Some((p, t));
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    let (matched, next) = match_class(pattern, p, text[t]);
                    if matched {
                        p = next;
                        t += 1;
                        continue;
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Matches one byte against the class starting at `pattern[start] == b'['`.
/// Returns whether it matched and the index just past the class.
fn match_class(pattern: &[u8], start: usize, c: u8) -> (bool, usize) {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    loop {
        match pattern.get(i) {
            // Unterminated class: Redis treats the end of the pattern as `]`.
            None => break,
            Some(b']') => {
                i += 1;
                break;
            }
            Some(b'\\') if i + 1 < pattern.len() => {
                if pattern[i + 1] == c {
                    matched = true;
                }
                i += 2;
            }
            Some(&lo)
                if pattern.get(i + 1) == Some(&b'-')
                    && pattern.get(i + 2).is_some_and(|&hi| hi != b']') =>
            {
                let hi = pattern[i + 2];
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                if (lo..=hi).contains(&c) {
                    matched = true;
                }
                i += 3;
            }
            Some(&lit) => {
                if lit == c {
                    matched = true;
                }
                i += 1;
            }
        }
    }

    (matched != negate, i)
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
