//! Warden Gate — one-time challenge issuance and verification, and
//! at-most-once execution of the privileged action a challenge is bound
//! to.

pub mod action;
pub mod actions;
pub mod audit;
pub mod code;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod reconcile;
pub mod registry;
pub mod service;

pub use action::{ActionContext, ActionExecutionResult, ActionHandler, ActionOutcome};
pub use audit::AuditLogger;
pub use config::GateConfig;
pub use error::ChallengeError;
pub use registry::{ActionRegistry, ActionRegistryBuilder};
pub use service::{ChallengeService, IssueChallenge, IssuedChallenge, VerifyChallenge, VerifyOutput};
