//! Challenge service: issuance, verification and gated dispatch.
//!
//! Verification checks, in order: existence, consumption, expiry, the
//! retry budget, and finally the code itself. A correct code consumes
//! the challenge with a compare-and-swap; only the caller that wins the
//! swap dispatches the bound action. The action and its audit entry run
//! on a detached task, so dropping the verifying future after
//! consumption cannot cancel them.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;
use warden_core::error::WardenError;
use warden_core::models::audit::{AuditOutcome, CreateAuditLogEntry, events};
use warden_core::models::challenge::{Challenge, CreateChallenge};
use warden_core::repository::{AuditLogRepository, ChallengeRepository};

use crate::action::{ActionContext, ActionExecutionResult, ActionOutcome};
use crate::audit::AuditLogger;
use crate::code::{generate_code, hash_code, is_well_formed, verify_code};
use crate::config::GateConfig;
use crate::delivery::{DeliveryError, DeliveryProvider};
use crate::error::ChallengeError;
use crate::registry::ActionRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueChallenge {
    pub owner_id: String,
    /// Where the code is delivered (phone number, address, ...).
    pub destination: String,
    pub action_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssuedChallenge {
    pub challenge_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyChallenge {
    pub challenge_id: Uuid,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyOutput {
    pub challenge_id: Uuid,
    pub outcome: ActionOutcome,
    pub detail: Option<String>,
}

pub struct ChallengeService<C, A>
where
    C: ChallengeRepository,
    A: AuditLogRepository + 'static,
{
    challenges: Arc<C>,
    audit: AuditLogger<A>,
    registry: Arc<ActionRegistry>,
    delivery: Arc<dyn DeliveryProvider>,
    config: GateConfig,
}

impl<C, A> Clone for ChallengeService<C, A>
where
    C: ChallengeRepository,
    A: AuditLogRepository + 'static,
{
    fn clone(&self) -> Self {
        Self {
            challenges: Arc::clone(&self.challenges),
            audit: self.audit.clone(),
            registry: Arc::clone(&self.registry),
            delivery: Arc::clone(&self.delivery),
            config: self.config.clone(),
        }
    }
}

impl<C, A> ChallengeService<C, A>
where
    C: ChallengeRepository,
    A: AuditLogRepository + 'static,
{
    pub fn new(
        challenges: C,
        audit: AuditLogger<A>,
        registry: Arc<ActionRegistry>,
        delivery: Arc<dyn DeliveryProvider>,
        config: GateConfig,
    ) -> Self {
        Self {
            challenges: Arc::new(challenges),
            audit,
            registry,
            delivery,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Issue a challenge and deliver its code to `input.destination`.
    ///
    /// If delivery fails the challenge stays persisted and the error
    /// carries its id.
    pub async fn issue(&self, input: IssueChallenge) -> Result<IssuedChallenge, ChallengeError> {
        if input.owner_id.trim().is_empty() {
            return Err(ChallengeError::Validation("owner_id must not be empty".into()));
        }
        if input.destination.trim().is_empty() {
            return Err(ChallengeError::Validation("destination must not be empty".into()));
        }
        let metadata = match input.metadata {
            None => serde_json::json!({}),
            Some(value @ serde_json::Value::Object(_)) => value,
            Some(_) => {
                return Err(ChallengeError::Validation("metadata must be a JSON object".into()));
            }
        };
        if let Some(action_id) = &input.action_id {
            if !self.registry.contains(action_id) {
                return Err(ChallengeError::UnknownAction(action_id.clone()));
            }
        }

        self.check_rate_limit(&input.owner_id).await?;

        let code = generate_code();
        let code_hash = {
            let code = code.clone();
            let pepper = self.config.code_pepper.clone();
            let params = self.config.code_hash.clone();
            tokio::task::spawn_blocking(move || hash_code(&code, pepper.as_deref(), &params))
                .await
                .map_err(|e| ChallengeError::Crypto(format!("hashing task failed: {e}")))??
        };

        let expires_at =
            Utc::now() + Duration::seconds(self.config.challenge_lifetime_secs as i64);
        let challenge = self
            .challenges
            .create(CreateChallenge {
                owner_id: input.owner_id,
                code_hash,
                action_id: input.action_id,
                metadata,
                expires_at,
                max_retries: self.config.max_retries,
            })
            .await?;

        let delivered = tokio::time::timeout(
            self.config.delivery_timeout(),
            self.delivery.send(&input.destination, &code),
        )
        .await;
        let delivery_failure = match delivered {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(DeliveryError::Timeout(self.config.delivery_timeout()).to_string()),
        };

        if let Some(reason) = delivery_failure {
            warn!(
                challenge_id = %challenge.id,
                provider = self.delivery.name(),
                %reason,
                "Code delivery failed"
            );
            self.audit
                .record(issue_entry(&challenge, AuditOutcome::Failed, Some(reason.clone())))
                .await;
            return Err(ChallengeError::Delivery {
                challenge_id: challenge.id,
                reason,
            });
        }

        self.audit
            .record(issue_entry(&challenge, AuditOutcome::Succeeded, None))
            .await;
        info!(
            challenge_id = %challenge.id,
            owner_id = %challenge.owner_id,
            action_id = ?challenge.action_id,
            %expires_at,
            "Challenge issued"
        );

        Ok(IssuedChallenge {
            challenge_id: challenge.id,
            expires_at,
        })
    }

    async fn check_rate_limit(&self, owner_id: &str) -> Result<(), ChallengeError> {
        if self.config.max_issued_per_window == 0 {
            return Ok(());
        }
        let since = Utc::now() - Duration::seconds(self.config.rate_window_secs as i64);
        let issued = self.challenges.count_created_since(owner_id, since).await?;
        if issued >= u64::from(self.config.max_issued_per_window) {
            warn!(owner_id, issued, "Challenge issuance rate limit reached");
            return Err(ChallengeError::RateLimited);
        }
        Ok(())
    }

    /// Verify a submitted code and, if it is accepted, run the bound
    /// action exactly once.
    ///
    /// `Err` means the code was not accepted and nothing ran. `Ok`
    /// means the challenge was consumed by this call; the output carries
    /// the action outcome.
    pub async fn verify(&self, input: VerifyChallenge) -> Result<VerifyOutput, ChallengeError> {
        let challenge_id = input.challenge_id;

        let challenge = match self.challenges.get_by_id(challenge_id).await {
            Ok(challenge) => challenge,
            Err(WardenError::NotFound { .. }) => {
                let err = ChallengeError::NotFound;
                self.audit
                    .record(CreateAuditLogEntry {
                        challenge_id,
                        owner_id: String::new(),
                        action_id: None,
                        event: events::CHALLENGE_VERIFY.into(),
                        outcome: AuditOutcome::Denied,
                        detail: Some(err.to_string()),
                        metadata: serde_json::json!({}),
                    })
                    .await;
                info!(%challenge_id, "Verification for unknown challenge");
                return Err(err);
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(err) = self.accept_code(&challenge, &input.code).await {
            let outcome = match err {
                ChallengeError::Store(_) | ChallengeError::Crypto(_) => AuditOutcome::Failed,
                _ => AuditOutcome::Denied,
            };
            self.audit
                .record(verify_entry(&challenge, outcome, Some(err.to_string())))
                .await;
            info!(%challenge_id, error = %err, "Challenge verification denied");
            return Err(err);
        }

        info!(%challenge_id, action_id = ?challenge.action_id, "Challenge consumed");

        let completion = tokio::spawn(complete_consumed(
            challenge,
            Arc::clone(&self.registry),
            self.audit.clone(),
        ));
        let result = match completion.await {
            Ok(result) => result,
            Err(e) => {
                error!(%challenge_id, error = %e, "Action completion task failed");
                ActionExecutionResult::failed(format!("action task failed: {e}"))
            }
        };

        Ok(VerifyOutput {
            challenge_id,
            outcome: result.outcome,
            detail: result.detail,
        })
    }

    /// Run the ordered checks and consume the challenge on a correct
    /// code.
    async fn accept_code(&self, challenge: &Challenge, code: &str) -> Result<(), ChallengeError> {
        if challenge.consumed {
            return Err(ChallengeError::AlreadyConsumed);
        }
        if challenge.is_expired_at(Utc::now()) {
            return Err(ChallengeError::Expired);
        }
        if challenge.retries_exhausted() {
            return Err(ChallengeError::RetryLimitExceeded);
        }

        let matches = if is_well_formed(code) {
            let code = code.to_string();
            let hash = challenge.code_hash.clone();
            let pepper = self.config.code_pepper.clone();
            tokio::task::spawn_blocking(move || verify_code(&code, &hash, pepper.as_deref()))
                .await
                .map_err(|e| ChallengeError::Crypto(format!("verification task failed: {e}")))??
        } else {
            false
        };

        if !matches {
            let updated = self.challenges.record_failed_attempt(challenge.id).await?;
            if updated.consumed {
                return Err(ChallengeError::AlreadyConsumed);
            }
            if updated.retries_exhausted() {
                return Err(ChallengeError::RetryLimitExceeded);
            }
            return Err(ChallengeError::InvalidCode {
                remaining: updated.remaining_attempts(),
            });
        }

        if !self.challenges.try_consume(challenge.id).await? {
            // The swap re-checks consumption, budget and expiry; report
            // whichever one the stored record now fails.
            let current = self.challenges.get_by_id(challenge.id).await?;
            return Err(unconsumable_reason(&current));
        }
        Ok(())
    }
}

fn unconsumable_reason(challenge: &Challenge) -> ChallengeError {
    if challenge.consumed {
        ChallengeError::AlreadyConsumed
    } else if challenge.retries_exhausted() {
        ChallengeError::RetryLimitExceeded
    } else if challenge.is_expired_at(Utc::now()) {
        ChallengeError::Expired
    } else {
        ChallengeError::AlreadyConsumed
    }
}

/// Dispatch the bound action of a consumed challenge and audit the
/// outcome. Handler errors and panics become `Failed`.
async fn complete_consumed<A: AuditLogRepository + 'static>(
    challenge: Challenge,
    registry: Arc<ActionRegistry>,
    audit: AuditLogger<A>,
) -> ActionExecutionResult {
    let result = match &challenge.action_id {
        None => ActionExecutionResult::succeeded(),
        Some(action_id) => run_action(&challenge, action_id, &registry).await,
    };

    audit
        .record(verify_entry(
            &challenge,
            result.outcome.into(),
            result.detail.clone(),
        ))
        .await;
    info!(
        challenge_id = %challenge.id,
        action_id = ?challenge.action_id,
        outcome = result.outcome.as_str(),
        "Challenge action completed"
    );

    result
}

async fn run_action(
    challenge: &Challenge,
    action_id: &str,
    registry: &ActionRegistry,
) -> ActionExecutionResult {
    let handler = match registry.resolve(action_id) {
        Ok(handler) => handler,
        Err(e) => {
            error!(challenge_id = %challenge.id, action_id, "Consumed challenge has no handler");
            return ActionExecutionResult::failed(format!("configuration error: {e}"));
        }
    };

    let ctx = ActionContext {
        challenge_id: challenge.id,
        owner_id: challenge.owner_id.clone(),
        action_id: action_id.to_string(),
    };
    let metadata = challenge.metadata.clone();

    let task = tokio::spawn(async move { handler.execute(&ctx, &metadata).await });
    match task.await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(challenge_id = %challenge.id, action_id, error = %e, "Action returned an error");
            ActionExecutionResult::failed(format!("action error: {e}"))
        }
        Err(e) if e.is_panic() => {
            error!(challenge_id = %challenge.id, action_id, "Action panicked");
            ActionExecutionResult::failed("action panicked")
        }
        Err(e) => ActionExecutionResult::failed(format!("action task cancelled: {e}")),
    }
}

fn issue_entry(
    challenge: &Challenge,
    outcome: AuditOutcome,
    detail: Option<String>,
) -> CreateAuditLogEntry {
    entry(challenge, events::CHALLENGE_ISSUED, outcome, detail)
}

fn verify_entry(
    challenge: &Challenge,
    outcome: AuditOutcome,
    detail: Option<String>,
) -> CreateAuditLogEntry {
    entry(challenge, events::CHALLENGE_VERIFY, outcome, detail)
}

fn entry(
    challenge: &Challenge,
    event: &str,
    outcome: AuditOutcome,
    detail: Option<String>,
) -> CreateAuditLogEntry {
    CreateAuditLogEntry {
        challenge_id: challenge.id,
        owner_id: challenge.owner_id.clone(),
        action_id: challenge.action_id.clone(),
        event: event.into(),
        outcome,
        detail,
        metadata: challenge.metadata.clone(),
    }
}
