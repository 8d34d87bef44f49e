//! Shared application state.
//!
//! Built once at startup from the validated config and the stores. Client
//! data and service queues use the data store; permission policies are read
//! from and persisted to the param store. Background loops are started
//! separately with [`AppState::start_background`] so tests
//! can drive the state without them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use qgate_core::error::{QgateError, Result};
use qgate_core::protocol::command::Access;

use crate::config::GatewayConfig;
use crate::context::{StaticTokenVerifier, TokenVerifier};
use crate::dispatch::{DispatchClient, Service, ServiceRegistry, ThroughputCounter, Worker, WorkerConfig};
use crate::lifecycle::{spawn_periodic, BackgroundTasks, Shutdown};
use crate::obs::GatewayMetrics;
use crate::permission::{run_persister, PermissionEngine, PersistHandle, PolicyWrite};
use crate::services::EchoService;
use crate::store::{KvStore, Stores};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: GatewayConfig,
    store: Arc<dyn KvStore>,
    param_store: Arc<dyn KvStore>,
    permissions: Arc<PermissionEngine>,
    dispatch: DispatchClient,
    services: Arc<ServiceRegistry>,
    throughput: Arc<ThroughputCounter>,
    metrics: Arc<GatewayMetrics>,
    verifier: Arc<dyn TokenVerifier>,
    persist_rx: Mutex<Option<mpsc::Receiver<PolicyWrite>>>,
}

impl AppState {
    /// Build application state over one store for data and policies.
    /// Expects a config that passed `validate()`.
    pub fn new(cfg: GatewayConfig, store: Arc<dyn KvStore>) -> Result<Self> {
        Self::with_stores(cfg, Stores::shared(store))
    }

    pub fn with_stores(cfg: GatewayConfig, stores: Stores) -> Result<Self> {
        let Stores {
            data: store,
            params: param_store,
        } = stores;
        let (persist, persist_rx) = PersistHandle::channel(cfg.permissions.persist_queue);
        let permissions = Arc::new(PermissionEngine::new(&cfg.permissions, persist));
        let dispatch = DispatchClient::new(Arc::clone(&store), cfg.dispatch.queue_ttl())
            .with_queue_prefix(cfg.dispatch.queue_prefix.clone());
        let verifier: Arc<dyn TokenVerifier> =
            Arc::new(StaticTokenVerifier::new(cfg.auth.tokens.clone()));

        let services = Arc::new(ServiceRegistry::new());
        services.register(Arc::new(EchoService::new()));

        tracing::info!(
            mode = ?cfg.permissions.mode,
            services = ?services.names(),
            "gateway state built"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                store,
                param_store,
                permissions,
                dispatch,
                services,
                throughput: Arc::new(ThroughputCounter::new()),
                metrics: Arc::new(GatewayMetrics::default()),
                verifier,
                persist_rx: Mutex::new(Some(persist_rx)),
            }),
        })
    }

    /// Add a service. Must happen before [`start_background`](Self::start_background).
    pub fn register_service(&self, svc: Arc<dyn Service>) {
        self.inner.services.register(svc);
    }

    /// Spawn permission refresh, the policy persister, worker loops,
    /// throughput reporting and store sweeping. Can only be called once.
    pub fn start_background(&self) -> Result<BackgroundTasks> {
        let persist_rx = self
            .inner
            .persist_rx
            .lock()
            .map_err(|_| QgateError::Internal("persist receiver lock poisoned".into()))?
            .take()
            .ok_or_else(|| QgateError::Internal("background tasks already started".into()))?;

        let cfg = &self.inner.cfg;
        let mut tasks = BackgroundTasks::new(Shutdown::new());
        let signal = tasks.signal();

        for h in self
            .inner
            .permissions
            .spawn_refresh(Arc::clone(&self.inner.param_store), &cfg.permissions, &signal)
        {
            tasks.push("permission-refresh", h);
        }

        tasks.push(
            "policy-persister",
            tokio::spawn(run_persister(
                Arc::clone(&self.inner.param_store),
                persist_rx,
                signal.clone(),
            )),
        );

        if cfg.workers.enabled {
            let wcfg = WorkerConfig {
                batch_size: cfg.workers.batch_size,
                poll_timeout: cfg.workers.poll_timeout(),
                reply_ttl: cfg.dispatch.reply_ttl(),
            };
            for svc in self.inner.services.all() {
                let worker = Worker::new(
                    svc,
                    Arc::clone(&self.inner.store),
                    Arc::clone(&self.inner.throughput),
                    wcfg,
                )
                .with_queue_prefix(&cfg.dispatch.queue_prefix);
                tasks.push("worker", worker.spawn(signal.clone()));
            }
        }

        let throughput = Arc::clone(&self.inner.throughput);
        tasks.push(
            "throughput-report",
            spawn_periodic(
                "throughput-report",
                cfg.workers.report_interval(),
                signal.clone(),
                move || {
                    throughput.report();
                    async {}
                },
            ),
        );

        let store = Arc::clone(&self.inner.store);
        tasks.push(
            "store-sweep",
            spawn_periodic("store-sweep", SWEEP_INTERVAL, signal, move || {
                let dropped = store.sweep_expired();
                if dropped > 0 {
                    tracing::debug!(dropped, "expired keys swept");
                }
                async {}
            }),
        );

        tracing::info!(tasks = tasks.len(), "background tasks started");
        Ok(tasks)
    }

    pub fn cfg(&self) -> &GatewayConfig {
        &self.inner.cfg
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.inner.store
    }

    pub fn param_store(&self) -> &Arc<dyn KvStore> {
        &self.inner.param_store
    }

    /// Keys no data command may touch: the policy hashes and every service
    /// queue.
    pub fn is_reserved_key(&self, key: &str) -> bool {
        let p = &self.inner.cfg.permissions;
        [&p.read_key, &p.write_key, &p.delete_key, &p.call_key]
            .iter()
            .any(|k| k.as_str() == key)
            || key.starts_with(&self.inner.cfg.dispatch.queue_prefix)
    }

    pub fn permissions(&self) -> &PermissionEngine {
        &self.inner.permissions
    }

    pub fn dispatch(&self) -> &DispatchClient {
        &self.inner.dispatch
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.inner.services
    }

    pub fn throughput(&self) -> &ThroughputCounter {
        &self.inner.throughput
    }

    pub fn verifier(&self) -> &dyn TokenVerifier {
        self.inner.verifier.as_ref()
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.inner.metrics
    }

    pub fn set_draining(&self) {
        self.inner.metrics.set_draining();
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    /// Plain gauges appended to `/metrics`.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        let tables = |access| self.inner.permissions.table(access).len() as u64;
        vec![
            ("qgate_services_registered", self.inner.services.names().len() as u64),
            ("qgate_permission_policies_read", tables(Access::Read)),
            ("qgate_permission_policies_write", tables(Access::Write)),
            ("qgate_permission_policies_delete", tables(Access::Delete)),
            ("qgate_permission_policies_call", tables(Access::Call)),
        ]
    }
}
