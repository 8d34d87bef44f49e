//! Key-value / queue substrate.
//!
//! The gateway only needs a handful of list, hash and expiry primitives.
//! [`KvStore`] names them; any engine with atomic list push/pop, hash
//! storage, expiring keys and a blocking pop with timeout can back it.
//! [`RedisStore`] is the production engine; [`MemoryStore`] keeps everything
//! in process for tests and single-process development.

pub mod memory;
pub mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use qgate_core::protocol::command::ScoreBound;
use qgate_core::Result;

use crate::config::{StoreBackend, StoreSection};

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Sorted-set element with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: Bytes,
    pub score: f64,
}

/// Substrate operations consumed by the permission engine, the dispatch
/// client and the worker loops.
///
/// Implementations report substrate failures as `QgateError::Transport`.
#[async_trait]
pub trait KvStore: Send + Sync {
    // ---- lists

    /// Append to the tail of a list, creating it if needed. Returns the new length.
    async fn rpush(&self, key: &str, value: Bytes) -> Result<usize>;

    /// Append and (re)set the key's expiry as one atomic step.
    async fn rpush_expire(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Pop from the head of a list, waiting up to `timeout` for an element.
    /// Returns `(key, value)`, or `None` on timeout.
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<(String, Bytes)>>;

    /// Pop up to `count` elements from the head without waiting.
    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<Bytes>>;

    // ---- keys

    /// Set a key's expiry. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key of any type. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool>;

    // ---- hashes

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>>;

    async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<()>;

    /// Returns whether the field existed.
    async fn hdel(&self, key: &str, field: &str) -> Result<bool>;

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Bytes>>> {
        let mut out = Vec::with_capacity(fields.len());
        for f in fields {
            out.push(self.hget(key, f).await?);
        }
        Ok(out)
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.hgetall(key).await?.into_keys().collect();
        keys.sort();
        Ok(keys)
    }

    /// Values ordered by field name.
    async fn hvals(&self, key: &str) -> Result<Vec<Bytes>> {
        let mut entries: Vec<(String, Bytes)> = self.hgetall(key).await?.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries.into_iter().map(|(_, v)| v).collect())
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        Ok(self.hgetall(key).await?.len())
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self.hget(key, field).await?.is_some())
    }

    // ---- sets

    /// Returns whether the member was added.
    async fn sadd(&self, key: &str, member: Bytes) -> Result<bool>;

    async fn sismember(&self, key: &str, member: &[u8]) -> Result<bool>;

    // ---- sorted sets

    /// Add or re-score a member. Returns whether it was new.
    async fn zadd(&self, key: &str, score: f64, member: Bytes) -> Result<bool>;

    /// Members by rank, lowest score first. Negative indices count from
    /// the end; `stop` is inclusive.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>>;

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<ScoredMember>>;

    async fn zrank(&self, key: &str, member: &[u8]) -> Result<Option<usize>>;

    /// Drop keys whose expiry has passed. Engines that expire keys on their
    /// own keep the default no-op.
    fn sweep_expired(&self) -> usize {
        0
    }
}

/// Data and permission stores. The two may share an engine but are kept as
/// separate handles so policies can live apart from client data.
#[derive(Clone)]
pub struct Stores {
    pub data: Arc<dyn KvStore>,
    pub params: Arc<dyn KvStore>,
}

impl Stores {
    /// One store for everything.
    pub fn shared(store: Arc<dyn KvStore>) -> Self {
        Self {
            params: Arc::clone(&store),
            data: store,
        }
    }
}

/// Open the configured engine.
pub async fn open(cfg: &StoreSection) -> Result<Stores> {
    match cfg.backend {
        StoreBackend::Memory => {
            tracing::warn!("memory store selected; state is lost on restart and not shared");
            Ok(Stores {
                data: Arc::new(MemoryStore::new()),
                params: Arc::new(MemoryStore::new()),
            })
        }
        StoreBackend::Redis => {
            let data: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&cfg.data_url).await?);
            let params: Arc<dyn KvStore> = match cfg.param_url.as_deref() {
                Some(url) if url != cfg.data_url => Arc::new(RedisStore::connect(url).await?),
                _ => Arc::clone(&data),
            };
            Ok(Stores { data, params })
        }
    }
}
