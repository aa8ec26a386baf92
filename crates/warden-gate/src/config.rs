//! Gate configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::reconcile::RetryPolicy;

/// Argon2id cost parameters for hashing one-time codes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodeHashParams {
    /// Memory cost in KiB (default: 19456 = 19 MiB).
    pub memory_kib: u32,
    /// Number of passes (default: 2).
    pub iterations: u32,
    /// Degree of parallelism (default: 1).
    pub parallelism: u32,
}

impl Default for CodeHashParams {
    fn default() -> Self {
        // OWASP ASVS recommended: m=19456 (19 MiB), t=2, p=1
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Configuration for the challenge service and its actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Challenge lifetime in seconds (default: 300 = 5 minutes).
    pub challenge_lifetime_secs: u64,
    /// Wrong-code submissions allowed per challenge (default: 3).
    pub max_retries: u32,
    /// Optional pepper prepended to codes before hashing.
    pub code_pepper: Option<String>,
    pub code_hash: CodeHashParams,
    /// Maximum challenges issued per owner within the rate window
    /// (default: 5).
    pub max_issued_per_window: u32,
    /// Rate window in seconds (default: 900 = 15 minutes).
    pub rate_window_secs: u64,
    /// Timeout for a single delivery provider call (default: 5 s).
    pub delivery_timeout_ms: u64,
    /// Timeout for a single payment gateway call (default: 15 s).
    pub gateway_timeout_ms: u64,
    /// Backoff policy for background reconciliation writes.
    pub reconciliation: RetryPolicy,
    /// Consecutive audit append failures before the logger escalates
    /// from warnings to errors (default: 5).
    pub audit_failure_alert_threshold: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            challenge_lifetime_secs: 300,
            max_retries: 3,
            code_pepper: None,
            code_hash: CodeHashParams::default(),
            max_issued_per_window: 5,
            rate_window_secs: 900,
            delivery_timeout_ms: 5_000,
            gateway_timeout_ms: 15_000,
            reconciliation: RetryPolicy::default(),
            audit_failure_alert_threshold: 5,
        }
    }
}

impl GateConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }
}
