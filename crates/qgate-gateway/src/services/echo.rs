use async_trait::async_trait;
use serde_json::{Map, Value};

use qgate_core::error::Result;

use crate::dispatch::Service;

/// Replies with its arguments. Used to smoke-test the dispatch path.
#[derive(Default)]
pub struct EchoService;

impl EchoService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Service for EchoService {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn handle(&self, args: Map<String, Value>) -> Result<Value> {
        Ok(Value::Object(args))
    }
}
