//! Gateway config loader (strict parsing).

pub mod schema;

use std::fs;

use qgate_core::error::{QgateError, Result};

pub use schema::{
    AuthSection, DispatchSection, GatewayConfig, GatewaySection, PermissionMode,
    PermissionsSection, StoreBackend, StoreSection, WorkersSection,
};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "QGATE_CONFIG";

pub fn load_from_file(path: &str) -> Result<GatewayConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| QgateError::Internal(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<GatewayConfig> {
    let cfg: GatewayConfig = serde_yaml::from_str(s)
        .map_err(|e| QgateError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Path from `QGATE_CONFIG`, falling back to `qgate.yaml`.
pub fn config_path() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "qgate.yaml".to_string())
}
