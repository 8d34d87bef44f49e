//! Fire-and-forget persistence of learned policies.
//!
//! Learning hands the updated policy to a single persister task over a
//! bounded channel. A full channel or a failed write is logged and dropped;
//! the caller's request never waits on storage.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::lifecycle::ShutdownSignal;
use crate::store::KvStore;

use super::policy::PermissionPolicy;

#[derive(Debug, Clone)]
pub struct PolicyWrite {
    /// Durable hash the record belongs to.
    pub storage_key: String,
    pub policy: PermissionPolicy,
}

#[derive(Debug, Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<PolicyWrite>,
}

impl PersistHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PolicyWrite>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn submit(&self, write: PolicyWrite) {
        if let Err(e) = self.tx.try_send(write) {
            let (reason, w) = match e {
                mpsc::error::TrySendError::Full(w) => ("queue full", w),
                mpsc::error::TrySendError::Closed(w) => ("persister stopped", w),
            };
            tracing::warn!(
                storage_key = %w.storage_key,
                resource = %w.policy.resource_key,
                reason,
                "policy persist dropped"
            );
        }
    }
}

/// Drain `rx` into the store until shutdown; pending writes are flushed first.
pub async fn run_persister(
    store: Arc<dyn KvStore>,
    mut rx: mpsc::Receiver<PolicyWrite>,
    mut shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            biased;
            w = rx.recv() => match w {
                Some(w) => write_one(store.as_ref(), w).await,
                None => break,
            },
            _ = shutdown.wait() => {
                while let Ok(w) = rx.try_recv() {
                    write_one(store.as_ref(), w).await;
                }
                break;
            }
        }
    }
    tracing::debug!("policy persister stopped");
}

async fn write_one(store: &dyn KvStore, w: PolicyWrite) {
    let value = match w.policy.encode() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(resource = %w.policy.resource_key, error = %e, "policy encode failed");
            return;
        }
    };
    if let Err(e) = store.hset(&w.storage_key, &w.policy.resource_key, value).await {
        tracing::warn!(
            storage_key = %w.storage_key,
            resource = %w.policy.resource_key,
            error = %e,
            "policy persist failed"
        );
    }
}
