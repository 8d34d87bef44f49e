use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;

use qgate_core::error::{QgateError, Result};
use qgate_core::protocol::envelope::{Reply, RequestEnvelope};

use crate::lifecycle::ShutdownSignal;
use crate::store::KvStore;

use super::registry::Service;
use super::throughput::ThroughputCounter;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Envelopes taken per iteration: one blocking pop plus up to
    /// `batch_size - 1` non-blocking pops.
    pub batch_size: usize,
    /// Longest a blocking pop waits before re-checking shutdown.
    pub poll_timeout: Duration,
    /// Expiry set on each reply queue.
    pub reply_ttl: Duration,
}

/// Consumer loop for one service queue.
pub struct Worker {
    service: Arc<dyn Service>,
    queue: String,
    store: Arc<dyn KvStore>,
    throughput: Arc<ThroughputCounter>,
    cfg: WorkerConfig,
}

impl Worker {
    pub fn new(
        service: Arc<dyn Service>,
        store: Arc<dyn KvStore>,
        throughput: Arc<ThroughputCounter>,
        cfg: WorkerConfig,
    ) -> Self {
        Self {
            queue: service.name().to_string(),
            service,
            store,
            throughput,
            cfg,
        }
    }

    /// Serve from `{prefix}{service name}` instead of the bare name.
    pub fn with_queue_prefix(mut self, prefix: &str) -> Self {
        self.queue = format!("{prefix}{}", self.service.name());
        self
    }

    pub fn name(&self) -> &'static str {
        self.service.name()
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn spawn(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: ShutdownSignal) {
        tracing::info!(
            service = self.name(),
            queue = self.queue(),
            batch_size = self.cfg.batch_size,
            "worker started"
        );
        loop {
            // only the wait is cancelled by shutdown; a taken batch is always served
            let polled = tokio::select! {
                _ = shutdown.wait() => break,
                res = self.take_batch() => res,
            };
            match polled {
                Ok(batch) => {
                    for raw in batch {
                        self.serve(raw).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(service = self.name(), error = %e, "worker poll failed");
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        tracing::info!(service = self.name(), "worker stopped");
    }

    /// Wait for one batch and serve it in push order. Returns how many
    /// envelopes were taken.
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self.take_batch().await?;
        let taken = batch.len();
        for raw in batch {
            self.serve(raw).await;
        }
        Ok(taken)
    }

    async fn take_batch(&self) -> Result<Vec<Bytes>> {
        let queue = self.queue();
        let Some((_, first)) = self.store.blpop(queue, self.cfg.poll_timeout).await? else {
            return Ok(Vec::new());
        };

        let mut batch = vec![first];
        if self.cfg.batch_size > 1 {
            batch.extend(self.store.lpop(queue, self.cfg.batch_size - 1).await?);
        }
        Ok(batch)
    }

    /// Handle one envelope and push its reply. An envelope that cannot be
    /// decoded has nowhere to reply to and is dropped.
    pub async fn serve(&self, raw: Bytes) -> bool {
        let service = self.name();
        let env = match RequestEnvelope::decode(&raw) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(service, error = %e, "dropping undecodable envelope");
                return false;
            }
        };
        let reply_to = env.correlation_key().to_string();

        let reply = self.invoke(env).await;
        let sent = match reply.encode() {
            Ok(bytes) => self
                .store
                .rpush_expire(&reply_to, bytes, self.cfg.reply_ttl)
                .await
                .map_err(|e| {
                    tracing::warn!(service, reply_to = %reply_to, error = %e, "reply push failed")
                })
                .is_ok(),
            Err(e) => {
                tracing::warn!(service, error = %e, "reply encode failed");
                false
            }
        };

        self.throughput.inc(service);
        sent
    }

    /// Run the handler on its own task so a panic becomes an error reply.
    async fn invoke(&self, env: RequestEnvelope) -> Reply {
        let service = Arc::clone(&self.service);
        let args = env.into_args();
        match tokio::spawn(async move { service.handle(args).await }).await {
            Ok(Ok(value)) => Reply::Ok(value),
            Ok(Err(QgateError::Handler(msg))) => Reply::Err(msg),
            Ok(Err(e)) => Reply::Err(e.to_string()),
            Err(e) => {
                tracing::error!(service = self.name(), error = %e, "handler panicked");
                Reply::Err("handler panicked".into())
            }
        }
    }
}
