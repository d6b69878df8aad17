//! Result caching for the query path.
//!
//! The cache is layered in two pieces. [`CacheStore`] is the external
//! store capability (get/set/flush by key, with TTL); [`MemoryStore`] is
//! the default in-process store and [`RedisStore`] (behind the
//! `redis-cache` feature) a networked one. [`ResultCache`] is the adapter
//! the query path uses: it keys payloads by a SHA-1 of the canonicalized
//! SQL text plus bound columns and values, scopes every key under the
//! base table name, and flushes a whole table scope on any write.
//!
//! Store failures are deliberately quiet: a broken store degrades to a
//! cache miss and the query executes live.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::row::{Row, RowCollection};
use crate::value::Value;

/// External cache store capability.
pub trait CacheStore {
    /// Fetch a payload if it exists and is younger than `ttl` seconds.
    fn get(&mut self, key: &str, ttl: u64) -> Option<Vec<u8>>;

    /// Store a payload under `key` for `ttl` seconds. Returns whether the
    /// store accepted it.
    fn set(&mut self, key: &str, value: &[u8], ttl: u64) -> bool;

    /// Drop every key under `scope` (keys are `scope/<hash>`). Returns
    /// whether the flush ran.
    fn flush(&mut self, scope: &str) -> bool;
}

/// Shared handle to a cache store.
pub type CacheHandle = Rc<RefCell<dyn CacheStore>>;

/// In-process store; entries expire by age at read time.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, (Instant, Vec<u8>)>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the store in a shared handle.
    pub fn into_handle(self) -> CacheHandle {
        Rc::new(RefCell::new(self))
    }

    /// Number of live entries (expired entries still count until read).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn get(&mut self, key: &str, ttl: u64) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some((stored_at, payload)) if stored_at.elapsed().as_secs() < ttl => {
                Some(payload.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&mut self, key: &str, value: &[u8], _ttl: u64) -> bool {
        self.entries
            .insert(key.to_string(), (Instant::now(), value.to_vec()));
        true
    }

    fn flush(&mut self, scope: &str) -> bool {
        let prefix = format!("{scope}/");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        true
    }
}

/// Redis-backed store over a blocking connection.
#[cfg(feature = "redis-cache")]
pub struct RedisStore {
    connection: redis::Connection,
}

#[cfg(feature = "redis-cache")]
impl RedisStore {
    /// Open a connection to the given Redis URL.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DbError::Connection`] when the URL is invalid or
    /// the server is unreachable.
    pub fn open(url: &str) -> Result<Self, crate::error::DbError> {
        let client = redis::Client::open(url)
            .map_err(|e| crate::error::DbError::Connection(e.to_string()))?;
        let connection = client
            .get_connection()
            .map_err(|e| crate::error::DbError::Connection(e.to_string()))?;
        Ok(Self { connection })
    }

    /// Wrap the store in a shared handle.
    pub fn into_handle(self) -> CacheHandle {
        Rc::new(RefCell::new(self))
    }
}

#[cfg(feature = "redis-cache")]
impl CacheStore for RedisStore {
    fn get(&mut self, key: &str, _ttl: u64) -> Option<Vec<u8>> {
        use redis::Commands;
        match self.connection.get::<_, Option<Vec<u8>>>(key) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("cache store read failed for `{key}`: {e}");
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: u64) -> bool {
        use redis::Commands;
        match self.connection.set_ex::<_, _, ()>(key, value, ttl) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("cache store write failed for `{key}`: {e}");
                false
            }
        }
    }

    fn flush(&mut self, scope: &str) -> bool {
        use redis::Commands;
        let pattern = format!("{scope}/*");
        let keys: Vec<String> = match self.connection.keys(&pattern) {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("cache store flush failed for `{pattern}`: {e}");
                return false;
            }
        };
        if keys.is_empty() {
            return true;
        }
        match self.connection.del::<_, ()>(keys) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("cache store flush failed for `{pattern}`: {e}");
                false
            }
        }
    }
}

thread_local! {
    static DEFAULT_STORE: CacheHandle = MemoryStore::new().into_handle();
}

/// The process-default store shared by models built with
/// [`Model::connect`](crate::model::Model::connect). Swap in a different
/// store per model through
/// [`Model::with_session`](crate::model::Model::with_session).
pub(crate) fn default_store() -> CacheHandle {
    DEFAULT_STORE.with(Rc::clone)
}

/// A cached query result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CachedResult {
    /// A single-row fetch.
    Row(Row),
    /// A multi-row fetch.
    Rows(RowCollection),
}

/// The query path's view of the cache store.
#[derive(Clone)]
pub(crate) struct ResultCache {
    store: CacheHandle,
}

impl ResultCache {
    pub(crate) fn new(store: CacheHandle) -> Self {
        Self { store }
    }

    pub(crate) fn store_handle(&self) -> CacheHandle {
        Rc::clone(&self.store)
    }

    /// Table-scoped cache key for a finished query: the SHA-1 of the SQL
    /// text joined with the bound column names and bound values.
    pub(crate) fn key(table: &str, sql: &str, columns: &[String], values: &[Value]) -> String {
        let joined_columns = columns.join("-");
        let joined_values = values
            .iter()
            .map(Value::key_string)
            .collect::<Vec<_>>()
            .join("-");

        let mut hasher = Sha1::new();
        hasher.update(sql.as_bytes());
        hasher.update(b"-");
        hasher.update(joined_columns.as_bytes());
        hasher.update(b"-");
        hasher.update(joined_values.as_bytes());
        format!("{table}/{:x}", hasher.finalize())
    }

    /// Look up a payload; any store or decode failure is a miss.
    pub(crate) fn get(&self, key: &str, ttl: u64) -> Option<CachedResult> {
        let payload = self.store.borrow_mut().get(key, ttl)?;
        match serde_json::from_slice(&payload) {
            Ok(result) => {
                log::debug!("cache hit for `{key}`");
                Some(result)
            }
            Err(e) => {
                log::warn!("discarding undecodable cache payload for `{key}`: {e}");
                None
            }
        }
    }

    /// Store a payload; failures degrade to a no-op.
    pub(crate) fn set(&self, key: &str, result: &CachedResult, ttl: u64) -> bool {
        match serde_json::to_vec(result) {
            Ok(payload) => self.store.borrow_mut().set(key, &payload, ttl),
            Err(e) => {
                log::warn!("failed to encode cache payload for `{key}`: {e}");
                false
            }
        }
    }

    /// Drop every cached entry scoped to `table`.
    pub(crate) fn flush(&self, table: &str) {
        self.store.borrow_mut().flush(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ResultCache {
        ResultCache::new(MemoryStore::new().into_handle())
    }

    #[test]
    fn test_key_is_deterministic_and_table_scoped() {
        let values = vec![Value::Int(1), Value::Text("a".into())];
        let columns = vec!["id".to_string(), "name".to_string()];
        let a = ResultCache::key("users", "SELECT 1", &columns, &values);
        let b = ResultCache::key("users", "SELECT 1", &columns, &values);
        assert_eq!(a, b);
        assert!(a.starts_with("users/"));

        let c = ResultCache::key("users", "SELECT 2", &columns, &values);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_varies_with_bound_values() {
        let columns = vec!["id".to_string()];
        let a = ResultCache::key("users", "SELECT 1", &columns, &[Value::Int(1)]);
        let b = ResultCache::key("users", "SELECT 1", &columns, &[Value::Int(2)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_round_trip() {
        let cache = cache();
        let payload = CachedResult::Row(Row::from_pairs([("id", 1)]));
        assert!(cache.set("users/abc", &payload, 60));
        assert_eq!(cache.get("users/abc", 60), Some(payload));
    }

    #[test]
    fn test_zero_ttl_is_always_a_miss() {
        let cache = cache();
        let payload = CachedResult::Row(Row::new());
        cache.set("users/abc", &payload, 0);
        assert_eq!(cache.get("users/abc", 0), None);
    }

    #[test]
    fn test_flush_is_scoped_per_table() {
        let store = MemoryStore::new().into_handle();
        let cache = ResultCache::new(Rc::clone(&store));
        let payload = CachedResult::Row(Row::new());
        cache.set("users/a", &payload, 60);
        cache.set("users/b", &payload, 60);
        cache.set("posts/c", &payload, 60);

        cache.flush("users");

        assert_eq!(cache.get("users/a", 60), None);
        assert_eq!(cache.get("users/b", 60), None);
        assert_eq!(cache.get("posts/c", 60), Some(payload));
    }

    #[test]
    fn test_undecodable_payload_is_a_miss() {
        let store = MemoryStore::new().into_handle();
        store.borrow_mut().set("users/bad", b"not json", 60);
        let cache = ResultCache::new(store);
        assert_eq!(cache.get("users/bad", 60), None);
    }
}
