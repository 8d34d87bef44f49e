use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use qgate_core::error::{QgateError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub permissions: PermissionsSection,

    #[serde(default)]
    pub dispatch: DispatchSection,

    #[serde(default)]
    pub workers: WorkersSection,

    #[serde(default)]
    pub auth: AuthSection,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(QgateError::UnsupportedVersion);
        }

        self.gateway.validate()?;
        self.store.validate()?;
        self.permissions.validate()?;
        self.dispatch.validate()?;
        if [
            &self.permissions.read_key,
            &self.permissions.write_key,
            &self.permissions.delete_key,
            &self.permissions.call_key,
        ]
        .iter()
        .any(|k| k.starts_with(&self.dispatch.queue_prefix))
        {
            return Err(bad("permissions storage keys must not start with dispatch.queue_prefix"));
        }
        self.workers.validate()?;
        self.auth.validate()?;

        Ok(())
    }
}

fn bad(msg: &str) -> QgateError {
    QgateError::BadRequest(msg.to_string())
}

// --------------------
// gateway
// --------------------
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path of the single generic data/call endpoint.
    #[serde(default = "default_path")]
    pub path: String,

    /// Largest accepted request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(bad("gateway.path must start with '/'"));
        }
        if ["/healthz", "/readyz", "/metrics"].contains(&self.path.as_str()) {
            return Err(bad("gateway.path collides with an operational endpoint"));
        }
        if !(1024..=64 * 1024 * 1024).contains(&self.max_body_bytes) {
            return Err(bad("gateway.max_body_bytes must be between 1024 and 67108864"));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_path() -> String {
    "/rSvc".into()
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

// --------------------
// store
// --------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// Process-local; for tests and single-process development.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Client data and service queues.
    #[serde(default = "default_data_url")]
    pub data_url: String,

    /// Permission policies. Defaults to the data server.
    #[serde(default)]
    pub param_url: Option<String>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_url: default_data_url(),
            param_url: None,
        }
    }
}

impl StoreSection {
    pub fn validate(&self) -> Result<()> {
        if self.backend != StoreBackend::Redis {
            return Ok(());
        }
        let is_redis = |u: &str| u.starts_with("redis://") || u.starts_with("rediss://");
        if !is_redis(&self.data_url) {
            return Err(bad("store.data_url must be a redis:// or rediss:// url"));
        }
        if self.param_url.as_deref().is_some_and(|u| !is_redis(u)) {
            return Err(bad("store.param_url must be a redis:// or rediss:// url"));
        }
        Ok(())
    }
}

fn default_data_url() -> String {
    "redis://127.0.0.1:6379/0".into()
}

// --------------------
// permissions
// --------------------

/// How first-seen operations are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// First-seen operations are allowed and recorded in the allow list.
    Development,
    /// First-seen operations are denied and recorded in the deny list.
    #[default]
    Production,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionsSection {
    #[serde(default)]
    pub mode: PermissionMode,

    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Attempts per refresh tick before waiting for the next tick.
    #[serde(default = "default_refresh_retries")]
    pub refresh_retries: u32,

    /// Durable hash holding the read policies.
    #[serde(default = "default_read_key")]
    pub read_key: String,
    #[serde(default = "default_write_key")]
    pub write_key: String,
    #[serde(default = "default_delete_key")]
    pub delete_key: String,
    #[serde(default = "default_call_key")]
    pub call_key: String,

    /// Capacity of the queue feeding the policy persister.
    #[serde(default = "default_persist_queue")]
    pub persist_queue: usize,
}

impl Default for PermissionsSection {
    fn default() -> Self {
        Self {
            mode: PermissionMode::default(),
            refresh_interval_ms: default_refresh_interval_ms(),
            refresh_retries: default_refresh_retries(),
            read_key: default_read_key(),
            write_key: default_write_key(),
            delete_key: default_delete_key(),
            call_key: default_call_key(),
            persist_queue: default_persist_queue(),
        }
    }
}

impl PermissionsSection {
    pub fn validate(&self) -> Result<()> {
        if !(1000..=600_000).contains(&self.refresh_interval_ms) {
            return Err(bad(
                "permissions.refresh_interval_ms must be between 1000 and 600000",
            ));
        }
        if !(1..=10).contains(&self.refresh_retries) {
            return Err(bad("permissions.refresh_retries must be between 1 and 10"));
        }
        if self.persist_queue == 0 {
            return Err(bad("permissions.persist_queue must be positive"));
        }

        let keys = [&self.read_key, &self.write_key, &self.delete_key, &self.call_key];
        if keys.iter().any(|k| k.is_empty()) {
            return Err(bad("permissions storage keys must not be empty"));
        }
        for (i, a) in keys.iter().enumerate() {
            if keys.iter().skip(i + 1).any(|b| a == b) {
                return Err(bad("permissions storage keys must be distinct"));
            }
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

fn default_refresh_interval_ms() -> u64 {
    10_000
}
fn default_refresh_retries() -> u32 {
    3
}
fn default_read_key() -> String {
    "RedisGetPermission".into()
}
fn default_write_key() -> String {
    "RedisPutPermission".into()
}
fn default_delete_key() -> String {
    "RedisDelPermission".into()
}
fn default_call_key() -> String {
    "RedisPostPermission".into()
}
fn default_persist_queue() -> usize {
    1024
}

// --------------------
// dispatch
// --------------------
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSection {
    /// Expiry refreshed on a service queue at every push.
    #[serde(default = "default_queue_ttl_ms")]
    pub queue_ttl_ms: u64,

    /// Expiry set on a reply queue after the reply is pushed.
    #[serde(default = "default_reply_ttl_ms")]
    pub reply_ttl_ms: u64,

    /// Default (and maximum) time a caller waits for a reply.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Service `name` is served from queue `{queue_prefix}{name}`. Data
    /// commands refuse keys under this prefix.
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            queue_ttl_ms: default_queue_ttl_ms(),
            reply_ttl_ms: default_reply_ttl_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            queue_prefix: default_queue_prefix(),
        }
    }
}

impl DispatchSection {
    pub fn validate(&self) -> Result<()> {
        if !(1000..=3_600_000).contains(&self.queue_ttl_ms) {
            return Err(bad("dispatch.queue_ttl_ms must be between 1000 and 3600000"));
        }
        if !(1000..=3_600_000).contains(&self.reply_ttl_ms) {
            return Err(bad("dispatch.reply_ttl_ms must be between 1000 and 3600000"));
        }
        if !(100..=600_000).contains(&self.call_timeout_ms) {
            return Err(bad("dispatch.call_timeout_ms must be between 100 and 600000"));
        }
        if self.queue_prefix.is_empty() {
            return Err(bad("dispatch.queue_prefix must not be empty"));
        }
        Ok(())
    }

    pub fn queue_ttl(&self) -> Duration {
        Duration::from_millis(self.queue_ttl_ms)
    }
    pub fn reply_ttl(&self) -> Duration {
        Duration::from_millis(self.reply_ttl_ms)
    }
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn default_queue_ttl_ms() -> u64 {
    60_000
}
fn default_reply_ttl_ms() -> u64 {
    20_000
}
fn default_call_timeout_ms() -> u64 {
    20_000
}
fn default_queue_prefix() -> String {
    "api:".into()
}

// --------------------
// workers
// --------------------
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersSection {
    /// Run worker loops for registered services in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Longest a worker blocks on an empty queue before re-checking shutdown.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

impl WorkersSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1024).contains(&self.batch_size) {
            return Err(bad("workers.batch_size must be between 1 and 1024"));
        }
        if !(10..=60_000).contains(&self.poll_timeout_ms) {
            return Err(bad("workers.poll_timeout_ms must be between 10 and 60000"));
        }
        if !(1000..=3_600_000).contains(&self.report_interval_ms) {
            return Err(bad(
                "workers.report_interval_ms must be between 1000 and 3600000",
            ));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    64
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_report_interval_ms() -> u64 {
    60_000
}

// --------------------
// auth
// --------------------
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
    /// Bearer token -> caller subject.
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

impl AuthSection {
    pub fn validate(&self) -> Result<()> {
        if self.tokens.iter().any(|(t, s)| t.is_empty() || s.is_empty()) {
            return Err(bad("auth.tokens entries must be non-empty"));
        }
        Ok(())
    }
}
