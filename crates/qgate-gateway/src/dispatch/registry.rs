use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use qgate_core::error::Result;

/// A handler bound to a service name. The name is also the queue it serves.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handle one call. `args` has the correlation field stripped.
    /// An error is sent back to the caller as a failed reply.
    async fn handle(&self, args: Map<String, Value>) -> Result<Value>;
}

/// Services registered in this process.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<&'static str, Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a service. Register before starting workers.
    pub fn register(&self, svc: Arc<dyn Service>) {
        if self.services.insert(svc.name(), svc).is_some() {
            tracing::warn!("service registered twice; previous handler replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.services.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        names
    }

    pub fn all(&self) -> Vec<Arc<dyn Service>> {
        self.services.iter().map(|e| Arc::clone(e.value())).collect()
    }
}
