use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use qgate_core::error::{QgateError, Result};
use qgate_core::protocol::command::{Access, Command};
use qgate_core::protocol::key::is_public_key;

use crate::config::{PermissionMode, PermissionsSection};
use crate::context::Caller;
use crate::lifecycle::{spawn_periodic, ShutdownSignal};
use crate::store::KvStore;

use super::persist::PersistHandle;
use super::scope::ScopedField;
use super::table::PermissionTable;

const REFRESH_BACKOFF: Duration = Duration::from_millis(500);

/// Permission decisions for every access kind.
/// Construct once at startup, then share via Arc.
pub struct PermissionEngine {
    mode: PermissionMode,
    read: Arc<PermissionTable>,
    write: Arc<PermissionTable>,
    delete: Arc<PermissionTable>,
    call: Arc<PermissionTable>,
}

impl PermissionEngine {
    pub fn new(cfg: &PermissionsSection, persist: PersistHandle) -> Self {
        let table = |access, key: &str| {
            Arc::new(PermissionTable::new(access, key, persist.clone()))
        };
        Self {
            mode: cfg.mode,
            read: table(Access::Read, &cfg.read_key),
            write: table(Access::Write, &cfg.write_key),
            delete: table(Access::Delete, &cfg.delete_key),
            call: table(Access::Call, &cfg.call_key),
        }
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn table(&self, access: Access) -> &Arc<PermissionTable> {
        match access {
            Access::Read => &self.read,
            Access::Write => &self.write,
            Access::Delete => &self.delete,
            Access::Call => &self.call,
        }
    }

    pub fn decide(&self, access: Access, raw_key: &str, op: &str) -> bool {
        self.table(access).decide(raw_key, op, self.mode)
    }

    pub fn check(&self, access: Access, raw_key: &str, op: &str) -> Result<()> {
        if self.decide(access, raw_key, op) {
            Ok(())
        } else {
            Err(QgateError::PermissionDenied(format!(
                "{} {op} on {raw_key}",
                access.as_str()
            )))
        }
    }

    /// Gate a parsed command. For a field-scoped write, returns the field
    /// bound to the caller's subject, which replaces the requested field.
    pub fn authorize(
        &self,
        raw_key: &str,
        cmd: &Command,
        caller: Option<&Caller>,
    ) -> Result<Option<String>> {
        let access = cmd.access();
        match access {
            Access::Read => {
                if !is_public_key(raw_key) {
                    return Err(QgateError::PermissionDenied(format!(
                        "key {raw_key} is private"
                    )));
                }
                self.check(access, raw_key, cmd.verb())?;
                Ok(None)
            }
            Access::Write => {
                let scoped = match cmd.field() {
                    Some(field) => ScopedField::parse(field)?,
                    None => None,
                };
                let Some(scoped) = scoped else {
                    self.check(access, raw_key, cmd.verb())?;
                    return Ok(None);
                };
                let caller = caller.ok_or(QgateError::AuthFailed)?;
                self.check(access, raw_key, &scoped.operation(cmd.verb()))?;
                Ok(Some(scoped.bind(&caller.subject)))
            }
            Access::Delete | Access::Call => {
                self.check(access, raw_key, cmd.verb())?;
                Ok(None)
            }
        }
    }

    /// One refresh task per table.
    pub fn spawn_refresh(
        &self,
        store: Arc<dyn KvStore>,
        cfg: &PermissionsSection,
        shutdown: &ShutdownSignal,
    ) -> Vec<JoinHandle<()>> {
        Access::ALL
            .iter()
            .map(|&access| {
                spawn_refresh_loop(
                    Arc::clone(self.table(access)),
                    Arc::clone(&store),
                    cfg.refresh_interval(),
                    cfg.refresh_retries,
                    shutdown.clone(),
                )
            })
            .collect()
    }
}

/// Periodic refresh; each tick retries a failed load a bounded number of
/// times and otherwise keeps serving the last good snapshot.
pub fn spawn_refresh_loop(
    table: Arc<PermissionTable>,
    store: Arc<dyn KvStore>,
    every: Duration,
    retries: u32,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    spawn_periodic("permission-refresh", every, shutdown, move || {
        let table = Arc::clone(&table);
        let store = Arc::clone(&store);
        async move {
            for attempt in 1..=retries.max(1) {
                match table.refresh(store.as_ref()).await {
                    Ok(_) => return,
                    Err(e) => {
                        tracing::warn!(
                            access = table.access().as_str(),
                            attempt,
                            error = %e,
                            "permission refresh failed"
                        );
                        if attempt < retries {
                            tokio::time::sleep(REFRESH_BACKOFF).await;
                        }
                    }
                }
            }
        }
    })
}
