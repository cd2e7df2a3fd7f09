//! Redis store backed by the `redis` crate.
//!
//! One multiplexed async connection per endpoint. The connection is cheap to
//! clone, so concurrent key transfers share it without locking; database
//! selection and `AUTH` happen once while connecting.

use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, Cmd, FromRedisValue, RedisError};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{KeyType, KeyValueStore};
use crate::endpoint::StoreEndpoint;
use crate::error::{Error, Result};

/// Redis implementation of [`KeyValueStore`].
pub struct RedisStore {
    endpoint: StoreEndpoint,
    command_timeout: Option<Duration>,
    conn: Option<MultiplexedConnection>,
}

impl RedisStore {
    /// Creates an unconnected store. Call [`KeyValueStore::connect`] first.
    pub fn new(endpoint: StoreEndpoint, command_timeout: Option<Duration>) -> Self {
        Self {
            endpoint,
            command_timeout,
            conn: None,
        }
    }

    fn connection(&self) -> Result<MultiplexedConnection> {
        self.conn
            .clone()
            .ok_or_else(|| Error::Connection(format!("{} is not connected", self.endpoint)))
    }

    async fn bounded<T>(&self, name: &str, fut: impl Future<Output = T>) -> Result<T> {
        match self.command_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout(name.to_string())),
            None => Ok(fut.await),
        }
    }

    async fn query<T: FromRedisValue>(
        &self,
        name: &str,
        cmd: &Cmd,
        on_error: impl FnOnce(RedisError) -> Error,
    ) -> Result<T> {
        let mut conn = self.connection()?;
        self.bounded(name, cmd.query_async::<T>(&mut conn))
            .await?
            .map_err(on_error)
    }

    async fn read<T: FromRedisValue>(&self, name: &str, cmd: &Cmd, key: &str) -> Result<T> {
        self.query(name, cmd, |e| Error::read(key, e)).await
    }

    async fn write<T: FromRedisValue>(&self, name: &str, cmd: &Cmd, key: &str) -> Result<T> {
        self.query(name, cmd, |e| Error::write(key, e)).await
    }
}

/// Splits a flat `[a1, b1, a2, b2, ...]` reply into pairs.
pub(crate) fn pair_up(key: &str, flat: Vec<Vec<u8>>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if flat.len() % 2 != 0 {
        return Err(Error::read(key, "reply has an odd number of elements"));
    }
    let mut pairs = Vec::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(a), Some(b)) = (iter.next(), iter.next()) {
        pairs.push((a, b));
    }
    Ok(pairs)
}

/// Keeps the key names that are valid UTF-8. Binary key names cannot be
/// addressed through the `&str` key API, so they are logged and left alone.
pub(crate) fn utf8_keys(raw: Vec<Vec<u8>>) -> Vec<String> {
    raw.into_iter()
        .filter_map(|bytes| match String::from_utf8(bytes) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(
                    "Skipping key {:?}: name is not valid UTF-8",
                    String::from_utf8_lossy(e.as_bytes())
                );
                None
            }
        })
        .collect()
}

/// Parses a sorted-set score, including `inf` and `-inf`.
pub(crate) fn parse_score(key: &str, raw: &[u8]) -> Result<f64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| {
            Error::read(key, format!("invalid score {:?}", String::from_utf8_lossy(raw)))
        })
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to {}", self.endpoint);

        let url = self.endpoint.connection_url()?;
        let client = Client::open(url.as_str())
            .map_err(|e| Error::Connection(format!("{}: {e}", self.endpoint)))?;

        let conn = self
            .bounded("CONNECT", client.get_multiplexed_async_connection())
            .await?
            .map_err(|e| Error::Connection(format!("{}: {e}", self.endpoint)))?;
        self.conn = Some(conn);

        let _: String = self
            .query("PING", &::redis::cmd("PING"), |e| {
                Error::Connection(format!("{}: {e}", self.endpoint))
            })
            .await?;

        debug!("Connected to {}", self.endpoint);
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut cmd = ::redis::cmd("SCAN");
        cmd.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(count);
        let (next, raw): (u64, Vec<Vec<u8>>) =
            self.query("SCAN", &cmd, |e| Error::Scan(e.to_string())).await?;
        Ok((next, utf8_keys(raw)))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut cmd = ::redis::cmd("KEYS");
        cmd.arg(pattern);
        let raw: Vec<Vec<u8>> = self.query("KEYS", &cmd, |e| Error::Scan(e.to_string())).await?;
        Ok(utf8_keys(raw))
    }

    async fn key_info(&self, key: &str) -> Result<(String, i64)> {
        let mut pipe = ::redis::pipe();
        pipe.cmd("TYPE").arg(key).cmd("TTL").arg(key);

        let mut conn = self.connection()?;
        self.bounded("TYPE+TTL", pipe.query_async::<(String, i64)>(&mut conn))
            .await?
            .map_err(|e| Error::read(key, e))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut cmd = ::redis::cmd("EXISTS");
        cmd.arg(key);
        self.read("EXISTS", &cmd, key).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut cmd = ::redis::cmd("GET");
        cmd.arg(key);
        self.read("GET", &cmd, key).await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let mut cmd = ::redis::cmd("LRANGE");
        cmd.arg(key).arg(0).arg(-1);
        self.read("LRANGE", &cmd, key).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let mut cmd = ::redis::cmd("SMEMBERS");
        cmd.arg(key);
        self.read("SMEMBERS", &cmd, key).await
    }

    async fn zset_range_with_scores(&self, key: &str) -> Result<Vec<(Vec<u8>, f64)>> {
        let mut cmd = ::redis::cmd("ZRANGE");
        cmd.arg(key).arg(0).arg(-1).arg("WITHSCORES");
        let flat: Vec<Vec<u8>> = self.read("ZRANGE", &cmd, key).await?;

        pair_up(key, flat)?
            .into_iter()
            .map(|(member, score)| Ok((member, parse_score(key, &score)?)))
            .collect()
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut cmd = ::redis::cmd("HGETALL");
        cmd.arg(key);
        let flat: Vec<Vec<u8>> = self.read("HGETALL", &cmd, key).await?;
        pair_up(key, flat)
    }

    async fn hash_keys(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let mut cmd = ::redis::cmd("HKEYS");
        cmd.arg(key);
        self.read("HKEYS", &cmd, key).await
    }

    async fn value_len(&self, key: &str, key_type: KeyType) -> Result<u64> {
        let name = match key_type {
            KeyType::String => "STRLEN",
            KeyType::List => "LLEN",
            KeyType::Set => "SCARD",
            KeyType::ZSet => "ZCARD",
            KeyType::Hash => "HLEN",
        };
        let mut cmd = ::redis::cmd(name);
        cmd.arg(key);
        self.read(name, &cmd, key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.write("SET", &cmd, key).await
    }

    async fn list_push(&self, key: &str, values: &[Vec<u8>]) -> Result<u64> {
        let mut cmd = ::redis::cmd("RPUSH");
        cmd.arg(key).arg(values);
        self.write("RPUSH", &cmd, key).await
    }

    async fn set_add(&self, key: &str, members: &[Vec<u8>]) -> Result<u64> {
        let mut cmd = ::redis::cmd("SADD");
        cmd.arg(key).arg(members);
        self.write("SADD", &cmd, key).await
    }

    async fn zset_add(&self, key: &str, entries: &[(f64, Vec<u8>)]) -> Result<u64> {
        let mut cmd = ::redis::cmd("ZADD");
        cmd.arg(key);
        for (score, member) in entries {
            cmd.arg(*score).arg(member);
        }
        self.write("ZADD", &cmd, key).await
    }

    async fn hash_set_all(&self, key: &str, fields: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let mut cmd = ::redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _: u64 = self.write("HSET", &cmd, key).await?;
        Ok(())
    }

    async fn hash_set_if_absent(&self, key: &str, field: &[u8], value: &[u8]) -> Result<bool> {
        let mut cmd = ::redis::cmd("HSETNX");
        cmd.arg(key).arg(field).arg(value);
        self.write("HSETNX", &cmd, key).await
    }

    async fn hash_delete_fields(&self, key: &str, fields: &[Vec<u8>]) -> Result<u64> {
        let mut cmd = ::redis::cmd("HDEL");
        cmd.arg(key).arg(fields);
        self.write("HDEL", &cmd, key).await
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut cmd = ::redis::cmd("DEL");
        cmd.arg(key);
        self.write("DEL", &cmd, key).await
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<bool> {
        let mut cmd = ::redis::cmd("EXPIRE");
        cmd.arg(key).arg(seconds);
        self.write("EXPIRE", &cmd, key).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.conn.take().is_some() {
            debug!("Closed connection to {}", self.endpoint);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "redis_tests.rs"]
mod tests;
