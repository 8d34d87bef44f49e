use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use qgate_core::error::Result;
use qgate_core::protocol::command::Access;
use qgate_core::protocol::key::normalize_resource_key;

use crate::config::PermissionMode;
use crate::store::KvStore;

use super::persist::{PersistHandle, PolicyWrite};
use super::policy::PermissionPolicy;

const NEVER_LOADED: usize = usize::MAX;

/// In-memory policy table for one access kind.
///
/// Lookups take the read lock. Learning re-checks under the write lock so
/// the first classification wins. Refresh swaps the whole map.
pub struct PermissionTable {
    access: Access,
    storage_key: String,
    entries: RwLock<HashMap<String, PermissionPolicy>>,
    last_loaded: AtomicUsize,
    persist: PersistHandle,
}

impl PermissionTable {
    pub fn new(access: Access, storage_key: impl Into<String>, persist: PersistHandle) -> Self {
        Self {
            access,
            storage_key: storage_key.into(),
            entries: RwLock::new(HashMap::new()),
            last_loaded: AtomicUsize::new(NEVER_LOADED),
            persist,
        }
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Decide `op` on `raw_key`, learning it on first sight.
    /// Never touches storage; a learned policy is queued for persistence.
    pub fn decide(&self, raw_key: &str, op: &str, mode: PermissionMode) -> bool {
        let Some(resource) = normalize_resource_key(raw_key) else {
            return false;
        };

        // Poisoned lock means a logic bug elsewhere; deny instead of panic.
        {
            let Ok(entries) = self.entries.read() else {
                return false;
            };
            if let Some(known) = entries.get(resource).and_then(|p| p.classify(op)) {
                return known;
            }
        }

        let (allowed, learned) = {
            let Ok(mut entries) = self.entries.write() else {
                return false;
            };
            let policy = entries
                .entry(resource.to_string())
                .or_insert_with(|| PermissionPolicy::new(resource));
            // another request may have learned it between the two locks
            if let Some(known) = policy.classify(op) {
                return known;
            }
            let allowed = policy.learn(op, mode);
            (allowed, policy.clone())
        };

        tracing::info!(
            access = self.access.as_str(),
            resource,
            op,
            allowed,
            "permission learned"
        );
        self.persist.submit(PolicyWrite {
            storage_key: self.storage_key.clone(),
            policy: learned,
        });
        allowed
    }

    /// Current classification without learning.
    pub fn lookup(&self, raw_key: &str, op: &str) -> Option<bool> {
        let resource = normalize_resource_key(raw_key)?;
        let entries = self.entries.read().ok()?;
        entries.get(resource)?.classify(op)
    }

    pub fn snapshot(&self) -> HashMap<String, PermissionPolicy> {
        self.entries
            .read()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap in a new table wholesale.
    pub fn replace(&self, table: HashMap<String, PermissionPolicy>) {
        match self.entries.write() {
            Ok(mut entries) => *entries = table,
            Err(_) => tracing::error!(
                access = self.access.as_str(),
                "permission table lock poisoned; refresh skipped"
            ),
        }
    }

    /// Reload the whole table from durable storage.
    ///
    /// Any malformed record fails the refresh and leaves the current table
    /// untouched. Logs only when the record count changes.
    pub async fn refresh(&self, store: &dyn KvStore) -> Result<usize> {
        let raw = store.hgetall(&self.storage_key).await?;

        let mut table = HashMap::with_capacity(raw.len());
        for (field, bytes) in raw {
            let mut policy = PermissionPolicy::decode(&bytes)?;
            let repaired = policy.repair();
            if repaired > 0 {
                tracing::warn!(
                    access = self.access.as_str(),
                    resource = %field,
                    repaired,
                    "policy record listed operations twice; deny kept"
                );
            }
            table.insert(field, policy);
        }

        let count = table.len();
        self.replace(table);

        let prev = self.last_loaded.swap(count, Ordering::Relaxed);
        if prev != count {
            tracing::info!(
                access = self.access.as_str(),
                storage_key = %self.storage_key,
                records = count,
                "permission table loaded"
            );
        }
        Ok(count)
    }
}
