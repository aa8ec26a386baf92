//! The contract between the verifier and privileged action handlers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_core::error::WardenError;
use warden_core::models::audit::AuditOutcome;

/// Tri-state outcome reported by an action handler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionOutcome {
    /// The effect was applied.
    Succeeded,
    /// A business rule blocked the action. Never retried.
    Rejected,
    /// Transient or system failure. Safe to retry.
    Failed,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl From<ActionOutcome> for AuditOutcome {
    fn from(outcome: ActionOutcome) -> Self {
        match outcome {
            ActionOutcome::Succeeded => AuditOutcome::Succeeded,
            ActionOutcome::Rejected => AuditOutcome::Rejected,
            ActionOutcome::Failed => AuditOutcome::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionExecutionResult {
    pub outcome: ActionOutcome,
    /// Human-readable reason or note for the caller.
    pub detail: Option<String>,
}

impl ActionExecutionResult {
    pub fn succeeded() -> Self {
        Self {
            outcome: ActionOutcome::Succeeded,
            detail: None,
        }
    }

    pub fn succeeded_with(detail: impl Into<String>) -> Self {
        Self {
            outcome: ActionOutcome::Succeeded,
            detail: Some(detail.into()),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            outcome: ActionOutcome::Rejected,
            detail: Some(reason.into()),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            outcome: ActionOutcome::Failed,
            detail: Some(detail.into()),
        }
    }
}

/// Identifies the consumed challenge an action runs under.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub challenge_id: Uuid,
    pub owner_id: String,
    pub action_id: String,
}

/// A privileged operation that runs once its challenge is consumed.
///
/// Handlers classify their own outcomes. An `Err` is reserved for
/// unexpected faults; the verifier reports it as
/// [`ActionOutcome::Failed`].
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: &ActionContext,
        metadata: &serde_json::Value,
    ) -> Result<ActionExecutionResult, WardenError>;
}
