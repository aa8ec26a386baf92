//! Error types for the Warden system.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Verification failed: {reason}")]
    VerificationFailed { reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Code delivery failed: {0}")]
    Delivery(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type WardenResult<T> = Result<T, WardenError>;
