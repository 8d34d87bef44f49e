use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use qgate_core::error::{QgateError, Result};

use crate::config::PermissionMode;

/// Allow/deny classification of operations for one normalized resource key.
///
/// Serialized as the durable record:
/// `{"resourceKey": "...", "createdAt": 1700000000, "allowList": [...], "denyList": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionPolicy {
    pub resource_key: String,
    /// First-seen unix seconds.
    pub created_at: i64,
    #[serde(default)]
    pub allow_list: Vec<String>,
    #[serde(default)]
    pub deny_list: Vec<String>,
}

impl PermissionPolicy {
    pub fn new(resource_key: impl Into<String>) -> Self {
        Self {
            resource_key: resource_key.into(),
            created_at: now_unix(),
            allow_list: Vec::new(),
            deny_list: Vec::new(),
        }
    }

    /// `Some(true)` if allowed, `Some(false)` if denied, `None` if unseen.
    pub fn classify(&self, op: &str) -> Option<bool> {
        if self.allow_list.iter().any(|o| o == op) {
            return Some(true);
        }
        if self.deny_list.iter().any(|o| o == op) {
            return Some(false);
        }
        None
    }

    /// Record the first classification of `op`. Returns the decision.
    /// An already classified operation keeps its classification.
    pub fn learn(&mut self, op: &str, mode: PermissionMode) -> bool {
        if let Some(known) = self.classify(op) {
            return known;
        }
        match mode {
            PermissionMode::Development => {
                self.allow_list.push(op.to_string());
                true
            }
            PermissionMode::Production => {
                self.deny_list.push(op.to_string());
                false
            }
        }
    }

    /// Drop allow entries that are also denied, and duplicate entries.
    /// Returns the number of entries removed.
    pub fn repair(&mut self) -> usize {
        let before = self.allow_list.len() + self.deny_list.len();

        dedup_in_order(&mut self.deny_list);
        dedup_in_order(&mut self.allow_list);
        let deny = &self.deny_list;
        self.allow_list.retain(|op| !deny.contains(op));

        before - (self.allow_list.len() + self.deny_list.len())
    }

    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| QgateError::Internal(format!("policy encode: {e}")))
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| QgateError::BadRequest(format!("malformed policy record: {e}")))
    }
}

fn dedup_in_order(list: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    list.retain(|op| seen.insert(op.clone()));
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
