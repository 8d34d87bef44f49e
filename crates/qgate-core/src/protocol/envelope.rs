//! Request/reply envelopes for RPC over named queues.
//!
//! A request is a JSON object of caller arguments plus one reserved field,
//! [`CORRELATION_FIELD`], naming the private queue the reply must be pushed
//! to. A reply is a JSON object tagged `ok` or `err`.

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{QgateError, Result};

/// Reserved payload field carrying the correlation key.
pub const CORRELATION_FIELD: &str = "BackTo";

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a fresh correlation key: 128 random bits rendered in base 36.
pub fn new_correlation_key() -> String {
    let n: u128 = rand::thread_rng().gen();
    to_base36(n)
}

fn to_base36(mut n: u128) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(25);
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.iter().rev().map(|&b| char::from(b)).collect()
}

/// Request placed on a named queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    args: Map<String, Value>,
    correlation_key: String,
}

impl RequestEnvelope {
    /// Wrap caller arguments under a freshly generated correlation key.
    pub fn new(args: Map<String, Value>) -> Result<Self> {
        Self::with_key(args, new_correlation_key())
    }

    /// Wrap caller arguments under an explicit correlation key.
    ///
    /// Fails if the caller already set the reserved field; it would be
    /// silently overwritten otherwise.
    pub fn with_key(mut args: Map<String, Value>, correlation_key: String) -> Result<Self> {
        if args.contains_key(CORRELATION_FIELD) {
            return Err(QgateError::BadRequest(format!(
                "payload must not contain reserved field {CORRELATION_FIELD}"
            )));
        }
        if correlation_key.is_empty() {
            return Err(QgateError::BadRequest("empty correlation key".into()));
        }
        args.insert(
            CORRELATION_FIELD.to_string(),
            Value::String(correlation_key.clone()),
        );
        Ok(Self {
            args,
            correlation_key,
        })
    }

    /// Name of the private reply queue.
    pub fn correlation_key(&self) -> &str {
        &self.correlation_key
    }

    /// Arguments as they travel on the wire (reserved field included).
    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    /// Caller arguments with the reserved field stripped.
    pub fn into_args(mut self) -> Map<String, Value> {
        self.args.remove(CORRELATION_FIELD);
        self.args
    }

    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(&self.args)
            .map(Bytes::from)
            .map_err(|e| QgateError::Internal(format!("envelope encode failed: {e}")))
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let args: Map<String, Value> = serde_json::from_slice(raw)
            .map_err(|e| QgateError::BadRequest(format!("invalid envelope json: {e}")))?;

        let correlation_key = match args.get(CORRELATION_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => {
                return Err(QgateError::BadRequest(format!(
                    "envelope missing {CORRELATION_FIELD}"
                )))
            }
        };

        Ok(Self {
            args,
            correlation_key,
        })
    }
}

/// Result-or-error produced by a handler and carried back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    Ok(Value),
    Err(String),
}

impl Reply {
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| QgateError::Internal(format!("reply encode failed: {e}")))
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| QgateError::BadRequest(format!("invalid reply json: {e}")))
    }

    /// A failed handler surfaces as [`QgateError::Handler`].
    pub fn into_result(self) -> Result<Value> {
        match self {
            Reply::Ok(v) => Ok(v),
            Reply::Err(msg) => Err(QgateError::Handler(msg)),
        }
    }
}

impl<E: std::fmt::Display> From<std::result::Result<Value, E>> for Reply {
    fn from(r: std::result::Result<Value, E>) -> Self {
        match r {
            Ok(v) => Reply::Ok(v),
            Err(e) => Reply::Err(e.to_string()),
        }
    }
}
