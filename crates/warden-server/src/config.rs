//! Server configuration loaded from a TOML file.
//!
//! The file path comes from `WARDEN_CONFIG`. Without it every section
//! falls back to its defaults, which is enough for local development
//! (console delivery, no payment gateway).

use std::path::Path;

use serde::Deserialize;
use warden_db::DbConfig;
use warden_gate::GateConfig;
use warden_gate::delivery::DeliveryConfig;
use warden_gate::gateway::HttpGatewayConfig;

use crate::error::ServerError;

pub const CONFIG_ENV: &str = "WARDEN_CONFIG";

/// How long issued challenges and audit entries are kept.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Records older than this are purged (default: 90 days).
    pub retention_days: u32,
    /// Interval between purge sweeps (default: 1 hour).
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            sweep_interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub db: DbConfig,
    pub gate: GateConfig,
    pub delivery: DeliveryConfig,
    /// Payment gateway credentials. The refund action is only
    /// registered when this section is present.
    pub gateway: Option<HttpGatewayConfig>,
    pub retention: RetentionConfig,
}

impl ServerConfig {
    /// Load from the file named by `WARDEN_CONFIG`, or defaults.
    pub fn load() -> Result<Self, ServerError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ServerError> {
        toml::from_str(raw).map_err(|e| ServerError::Config(e.to_string()))
    }
}
