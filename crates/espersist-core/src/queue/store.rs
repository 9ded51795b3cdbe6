//! Counter store port and backends
//!
//! The persistence queues sit on top of an external key-value server that
//! supplies four operations: `get`, `set`, `delete` and an atomic `incr`.
//! The production backend is Redis; a process-local in-memory backend backs
//! tests and the embedded harness. Queue atomicity depends entirely on the
//! backend's atomic-increment primitive.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors raised by the counter store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed an operation
    #[error("Store backend error: {0}")]
    Backend(String),

    /// The store URI could not be understood
    #[error("Invalid store URI '{uri}': {reason}")]
    InvalidUri {
        /// The offending URI
        uri: String,
        /// Why it was rejected
        reason: String,
    },

    /// A counter key held something that is not an integer
    #[error("Corrupt counter '{key}': {value:?}")]
    CorruptCounter {
        /// The counter key
        key: String,
        /// The bytes found under the key
        value: Vec<u8>,
    },
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Result type for counter store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// External key-value store with an atomic increment primitive
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fetch the bytes stored under `key`, if any
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Store `value` under `key` only if the key is absent; returns whether
    /// the write happened
    async fn set_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<bool>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Atomically increment the integer under `key` and return the new value
    async fn incr(&self, key: &str) -> StoreResult<u64>;
}

/// Redis-backed counter store
pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis server at `uri`
    pub async fn connect(uri: &str) -> StoreResult<Self> {
        let client = redis::Client::open(uri)?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut con = self.manager.clone();
        Ok(con.get(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut con = self.manager.clone();
        con.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<bool> {
        let mut con = self.manager.clone();
        Ok(con.set_nx(key, value).await?)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut con = self.manager.clone();
        con.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<u64> {
        let mut con = self.manager.clone();
        Ok(con.incr(key, 1u64).await?)
    }
}

/// In-memory counter store for tests and the embedded harness.
///
/// Instances are shared per URI within the process so that a producer and a
/// consumer opened against the same `memory://<name>` URI see one store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an unshared store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            Ok(false)
        } else {
            entries.insert(key.to_string(), value.to_vec());
            Ok(true)
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<u64> {
        let mut entries = self.entries.lock().unwrap();
        let current = match entries.get(key) {
            Some(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| StoreError::CorruptCounter {
                    key: key.to_string(),
                    value: bytes.clone(),
                })?,
            None => 0,
        };
        let next = current + 1;
        entries.insert(key.to_string(), next.to_string().into_bytes());
        Ok(next)
    }
}

/// Per-process registry of shared memory stores, keyed by URI
static MEMORY_STORES: Lazy<Mutex<HashMap<String, Arc<MemoryStore>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Resolve a `memory://` URI to its process-shared store instance
fn memory_store(uri: &str) -> Arc<MemoryStore> {
    let mut stores = MEMORY_STORES.lock().unwrap();
    stores
        .entry(uri.to_string())
        .or_insert_with(|| Arc::new(MemoryStore::new()))
        .clone()
}

/// Open the counter store named by `uri`.
///
/// `redis://` and `rediss://` URIs connect to a Redis server; `memory://`
/// URIs resolve to a process-shared in-memory store.
pub async fn open_store(uri: &str) -> StoreResult<Arc<dyn CounterStore>> {
    let parsed = url::Url::parse(uri).map_err(|e| StoreError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "redis" | "rediss" => Ok(Arc::new(RedisStore::connect(uri).await?)),
        "memory" => Ok(memory_store(uri)),
        other => Err(StoreError::InvalidUri {
            uri: uri.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}
