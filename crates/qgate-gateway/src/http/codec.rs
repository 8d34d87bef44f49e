use std::collections::BTreeMap;
use std::time::Duration;

use qgate_core::error::{QgateError, Result};
use qgate_core::protocol::command::{Access, Command, CommandArgs};

/// Query parameters that route a request rather than feed the command.
const ROUTING: [&str; 3] = ["cmd", "key", "timeout_ms"];

/// Raw query string of the generic endpoint.
#[derive(Debug, Clone, Default)]
pub struct DataQuery {
    pub cmd: Option<String>,
    pub key: Option<String>,
    /// Call only; capped by `dispatch.call_timeout_ms`.
    pub timeout_ms: Option<String>,
    pub args: CommandArgs,
}

/// Decoded once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub key: String,
    pub cmd: Command,
    pub timeout: Option<Duration>,
}

impl DataQuery {
    pub fn from_params(mut params: BTreeMap<String, String>) -> Self {
        let arg = |name: &str| params.get(name).cloned();
        let args = CommandArgs {
            field: arg("field"),
            member: arg("member"),
            start: arg("start"),
            stop: arg("stop"),
            min: arg("min"),
            max: arg("max"),
            with_scores: arg("withscores"),
            score: arg("score"),
            form: BTreeMap::new(),
        };
        let [cmd, key, timeout_ms] = ROUTING.map(|name| params.remove(name));
        Self {
            cmd,
            key,
            timeout_ms,
            args: CommandArgs {
                form: params,
                ..args
            },
        }
    }

    pub fn decode(self, access: Access) -> Result<DataRequest> {
        let key = self
            .key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| QgateError::BadRequest("no key".into()))?;
        let cmd = Command::parse_with(
            access,
            self.cmd.as_deref().unwrap_or_default().trim(),
            &self.args,
        )?;
        let timeout = match self.timeout_ms.as_deref().map(str::trim) {
            None => None,
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) | Err(_) => {
                    return Err(QgateError::BadRequest(
                        "timeout_ms must be a positive integer".into(),
                    ))
                }
                Ok(ms) => Some(Duration::from_millis(ms)),
            },
        };
        Ok(DataRequest { key, cmd, timeout })
    }
}
