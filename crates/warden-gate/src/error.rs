//! Challenge error types.

use thiserror::Error;
use uuid::Uuid;
use warden_core::error::WardenError;

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("challenge not found")]
    NotFound,

    #[error("challenge has already been used")]
    AlreadyConsumed,

    #[error("challenge has expired")]
    Expired,

    #[error("too many invalid attempts for this challenge")]
    RetryLimitExceeded,

    #[error("invalid code ({remaining} attempts remaining)")]
    InvalidCode { remaining: u32 },

    #[error("action '{0}' is not registered")]
    UnknownAction(String),

    #[error("code delivery failed for challenge {challenge_id}: {reason}")]
    Delivery { challenge_id: Uuid, reason: String },

    #[error("too many challenges issued, try again later")]
    RateLimited,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("cryptography error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Store(#[from] WardenError),
}

impl ChallengeError {
    /// Terminal errors can never succeed for the same challenge;
    /// `InvalidCode` may be resubmitted until the budget runs out.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::AlreadyConsumed | Self::Expired | Self::RetryLimitExceeded
        )
    }
}

impl From<ChallengeError> for WardenError {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::NotFound
            | ChallengeError::AlreadyConsumed
            | ChallengeError::Expired
            | ChallengeError::RetryLimitExceeded
            | ChallengeError::InvalidCode { .. } => WardenError::VerificationFailed {
                reason: err.to_string(),
            },
            ChallengeError::UnknownAction(_) | ChallengeError::Validation(_) => {
                WardenError::Validation {
                    message: err.to_string(),
                }
            }
            ChallengeError::Delivery { .. } => WardenError::Delivery(err.to_string()),
            ChallengeError::RateLimited => WardenError::RateLimited,
            ChallengeError::Crypto(msg) => WardenError::Crypto(msg),
            ChallengeError::Store(inner) => inner,
        }
    }
}
