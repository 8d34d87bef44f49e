use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Map, Value};

use qgate_core::error::{QgateError, Result};
use qgate_core::protocol::envelope::{Reply, RequestEnvelope};

use crate::store::KvStore;

/// Extra time allowed past the caller's timeout before the wait is cut off
/// locally, in case the substrate overruns its own blocking-pop timeout.
const WAIT_GRACE: Duration = Duration::from_millis(250);

/// Caller side of RPC over a named queue.
#[derive(Clone)]
pub struct DispatchClient {
    store: Arc<dyn KvStore>,
    queue_ttl: Duration,
    queue_prefix: String,
}

impl DispatchClient {
    pub fn new(store: Arc<dyn KvStore>, queue_ttl: Duration) -> Self {
        Self {
            store,
            queue_ttl,
            queue_prefix: String::new(),
        }
    }

    /// Namespace service queues under `prefix`.
    pub fn with_queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.queue_prefix = prefix.into();
        self
    }

    /// Queue a service is served from.
    pub fn queue_for(&self, service: &str) -> String {
        format!("{}{service}", self.queue_prefix)
    }

    /// Enqueue `args` on `queue` and wait up to `timeout` for the raw reply.
    ///
    /// On `Timeout` the outcome is unknown: a worker may already have taken
    /// the request. Dropping the returned future stops the wait but does not
    /// retract the request.
    pub async fn call(
        &self,
        queue: &str,
        args: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Bytes> {
        if queue.is_empty() {
            return Err(QgateError::BadRequest("empty queue name".into()));
        }
        let env = RequestEnvelope::new(args)?;
        let payload = env.encode()?;

        self.store
            .rpush_expire(queue, payload, self.queue_ttl)
            .await?;
        tracing::debug!(queue, reply_to = env.correlation_key(), "request enqueued");

        let wait = self.store.blpop(env.correlation_key(), timeout);
        match tokio::time::timeout(timeout + WAIT_GRACE, wait).await {
            Ok(Ok(Some((_, reply)))) => Ok(reply),
            Ok(Ok(None)) | Err(_) => {
                tracing::debug!(queue, timeout_ms = timeout.as_millis() as u64, "call timed out");
                Err(QgateError::Timeout)
            }
            Ok(Err(e)) => Err(e),
        }
    }

    /// [`call`](Self::call) on the service's queue plus reply decoding; a
    /// failed handler surfaces as `QgateError::Handler`.
    pub async fn call_service(
        &self,
        service: &str,
        args: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value> {
        if service.is_empty() {
            return Err(QgateError::BadRequest("empty service name".into()));
        }
        let raw = self.call(&self.queue_for(service), args, timeout).await?;
        Reply::decode(&raw)
            .map_err(|e| QgateError::Internal(format!("undecodable reply from {service}: {e}")))?
            .into_result()
    }
}
