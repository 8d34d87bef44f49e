//! In-process implementation of [`KvStore`].
//!
//! Keys live in a `DashMap`; each key holds a list, hash, set or sorted set
//! plus an optional expiry deadline. Expired keys are dropped lazily on access and by
//! [`KvStore::sweep_expired`]. Blocking pops park on a per-key `Notify`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;

use qgate_core::error::{QgateError, Result};
use qgate_core::protocol::command::ScoreBound;

use super::{KvStore, ScoredMember};

#[derive(Debug)]
enum Slot {
    List(VecDeque<Bytes>),
    Hash(HashMap<String, Bytes>),
    Set(HashSet<Bytes>),
    /// Ordered by score, then member bytes.
    ZSet(Vec<ScoredMember>),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn list() -> Self {
        Self::with(Slot::List(VecDeque::new()))
    }

    fn hash() -> Self {
        Self::with(Slot::Hash(HashMap::new()))
    }

    fn set() -> Self {
        Self::with(Slot::Set(HashSet::new()))
    }

    fn zset() -> Self {
        Self::with(Slot::ZSet(Vec::new()))
    }

    fn with(slot: Slot) -> Self {
        Self {
            slot,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }

    fn is_empty(&self) -> bool {
        match &self.slot {
            Slot::List(l) => l.is_empty(),
            Slot::Hash(h) => h.is_empty(),
            Slot::Set(s) => s.is_empty(),
            Slot::ZSet(z) => z.is_empty(),
        }
    }
}

fn wrong_type(key: &str) -> QgateError {
    QgateError::Transport(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

/// Shared in-memory substrate. Cheap to share via `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    wakers: DashMap<String, Arc<Notify>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys (expired keys may still be counted until swept).
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Remaining time to live, if the key exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.purge_if_expired(key);
        let entry = self.entries.get(key)?;
        entry
            .expires_at
            .map(|t| t.saturating_duration_since(Instant::now()))
    }

    /// Length of a list key (0 if absent or expired).
    pub fn list_len(&self, key: &str) -> usize {
        self.purge_if_expired(key);
        match self.entries.get(key).as_deref() {
            Some(Entry {
                slot: Slot::List(l),
                ..
            }) => l.len(),
            _ => 0,
        }
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, e| e.is_expired(now));
    }

    fn push(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<usize> {
        self.purge_if_expired(key);
        let len = {
            let mut entry = self.entries.entry(key.to_string()).or_insert_with(Entry::list);
            let len = match &mut entry.slot {
                Slot::List(list) => {
                    list.push_back(value);
                    list.len()
                }
                _ => return Err(wrong_type(key)),
            };
            if let Some(ttl) = ttl {
                entry.expires_at = Some(Instant::now() + ttl);
            }
            len
        };
        if let Some(n) = self.wakers.get(key) {
            n.notify_waiters();
        }
        Ok(len)
    }

    fn pop_front(&self, key: &str, count: usize) -> Result<Vec<Bytes>> {
        self.purge_if_expired(key);
        let popped = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return Ok(Vec::new());
            };
            match &mut entry.slot {
                Slot::List(list) => {
                    let n = count.min(list.len());
                    list.drain(..n).collect::<Vec<_>>()
                }
                _ => return Err(wrong_type(key)),
            }
        };
        // empty lists do not exist
        self.entries.remove_if(key, |_, e| e.is_empty());
        Ok(popped)
    }

    fn waker(&self, key: &str) -> Arc<Notify> {
        let entry = self
            .wakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()));
        Arc::clone(entry.value())
    }

    fn with_hash<T>(&self, key: &str, f: impl FnOnce(&HashMap<String, Bytes>) -> T) -> Result<Option<T>> {
        self.purge_if_expired(key);
        match self.entries.get(key).as_deref() {
            None => Ok(None),
            Some(Entry {
                slot: Slot::Hash(h),
                ..
            }) => Ok(Some(f(h))),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn with_zset<T>(&self, key: &str, f: impl FnOnce(&[ScoredMember]) -> T) -> Result<T> {
        self.purge_if_expired(key);
        match self.entries.get(key).as_deref() {
            None => Ok(f(&[][..])),
            Some(Entry {
                slot: Slot::ZSet(z),
                ..
            }) => Ok(f(z.as_slice())),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

fn zset_order(a: &ScoredMember, score: f64, member: &[u8]) -> Ordering {
    a.score
        .total_cmp(&score)
        .then_with(|| a.member.as_ref().cmp(member))
}

/// Inclusive rank window with negative indices counted from the end.
fn rank_window(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let norm = |i: i64| if i < 0 { len + i } else { i };
    let start = norm(start).max(0);
    let stop = norm(stop).min(len - 1);
    if len == 0 || start > stop {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

/// Removes a key's `Notify` slot once no waiter holds it. Runs on drop so a
/// cancelled `blpop` cleans up too.
struct WakerGuard<'a> {
    store: &'a MemoryStore,
    key: &'a str,
}

impl Drop for WakerGuard<'_> {
    fn drop(&mut self) {
        self.store
            .wakers
            .remove_if(self.key, |_, n| Arc::strong_count(n) == 1);
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn rpush(&self, key: &str, value: Bytes) -> Result<usize> {
        self.push(key, value, None)
    }

    async fn rpush_expire(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.push(key, value, Some(ttl)).map(|_| ())
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<(String, Bytes)>> {
        let deadline = Instant::now() + timeout;
        // declared before `notify` so the handle is released first on drop
        let _guard = WakerGuard { store: self, key };
        let notify = self.waker(key);

        loop {
            // register interest before checking so a push in between is not missed
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(v) = self.pop_front(key, 1)?.pop() {
                return Ok(Some((key.to_string(), v)));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<Bytes>> {
        self.pop_front(key, count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.purge_if_expired(key);
        match self.entries.get_mut(key) {
            Some(mut e) => {
                e.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.purge_if_expired(key);
        Ok(self.entries.remove(key).is_some())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        Ok(self.with_hash(key, |h| h.get(field).cloned())?.flatten())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        Ok(self.with_hash(key, |h| h.clone())?.unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<()> {
        self.purge_if_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(Entry::hash);
        match &mut entry.slot {
            Slot::Hash(h) => {
                h.insert(field.to_string(), value);
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        self.purge_if_expired(key);
        let existed = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return Ok(false);
            };
            match &mut entry.slot {
                Slot::Hash(h) => h.remove(field).is_some(),
                _ => return Err(wrong_type(key)),
            }
        };
        self.entries.remove_if(key, |_, e| e.is_empty());
        Ok(existed)
    }

    async fn sadd(&self, key: &str, member: Bytes) -> Result<bool> {
        self.purge_if_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(Entry::set);
        match &mut entry.slot {
            Slot::Set(s) => Ok(s.insert(member)),
            _ => Err(wrong_type(key)),
        }
    }

    async fn sismember(&self, key: &str, member: &[u8]) -> Result<bool> {
        self.purge_if_expired(key);
        match self.entries.get(key).as_deref() {
            None => Ok(false),
            Some(Entry {
                slot: Slot::Set(s),
                ..
            }) => Ok(s.contains(member)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: Bytes) -> Result<bool> {
        self.purge_if_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(Entry::zset);
        let Slot::ZSet(z) = &mut entry.slot else {
            return Err(wrong_type(key));
        };
        let existed = match z.iter().position(|m| m.member == member) {
            Some(i) => {
                z.remove(i);
                true
            }
            None => false,
        };
        let at = z.partition_point(|m| zset_order(m, score, &member) == Ordering::Less);
        z.insert(at, ScoredMember { member, score });
        Ok(!existed)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>> {
        self.with_zset(key, |z| match rank_window(z.len(), start, stop) {
            Some((from, to)) => z[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<ScoredMember>> {
        self.with_zset(key, |z| {
            z.iter()
                .filter(|m| min.admits_from_below(m.score) && max.admits_from_above(m.score))
                .cloned()
                .collect()
        })
    }

    async fn zrank(&self, key: &str, member: &[u8]) -> Result<Option<usize>> {
        self.with_zset(key, |z| z.iter().position(|m| m.member.as_ref() == member))
    }

    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}
