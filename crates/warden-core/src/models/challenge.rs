//! Challenge domain model.
//!
//! A challenge binds a one-time code (stored only as a salted hash) to
//! an optional privileged action and the parameters that action will
//! run with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    /// Subject the challenge was issued for.
    pub owner_id: String,
    /// Argon2id PHC string of the delivered code.
    pub code_hash: String,
    /// Registry key of the bound action. `None` = verification only.
    pub action_id: Option<String>,
    /// Action-defined payload, passed to the handler unchanged.
    pub metadata: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    /// A challenge is unusable at and after `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Wrong-code submissions left before the challenge is invalidated.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChallenge {
    pub owner_id: String,
    /// Hash of the code (the raw code is never persisted).
    pub code_hash: String,
    pub action_id: Option<String>,
    pub metadata: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub max_retries: u32,
}
