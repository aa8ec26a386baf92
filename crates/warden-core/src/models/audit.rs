//! Audit log domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event names written to the audit log.
pub mod events {
    pub const CHALLENGE_ISSUED: &str = "challenge.issued";
    pub const CHALLENGE_VERIFY: &str = "challenge.verify";
    pub const RECONCILIATION_RETRY: &str = "reconciliation.retry";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditOutcome {
    /// The action (or plain verification) took effect.
    Succeeded,
    /// A business rule blocked the action.
    Rejected,
    /// Transient or system failure; a retry may still converge.
    Failed,
    /// The code was not accepted (wrong, expired, consumed, ...).
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "Succeeded",
            Self::Rejected => "Rejected",
            Self::Failed => "Failed",
            Self::Denied => "Denied",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub challenge_id: Uuid,
    pub owner_id: String,
    pub action_id: Option<String>,
    pub event: String,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    /// Snapshot of the challenge metadata at the time of the event.
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuditLogEntry {
    pub challenge_id: Uuid,
    pub owner_id: String,
    pub action_id: Option<String>,
    pub event: String,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    pub metadata: serde_json::Value,
}
