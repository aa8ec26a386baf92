//! Background reconciliation of internal state after partial failure.
//!
//! Action handlers hand a write they could not apply to the
//! [`RetryScheduler`] and return immediately. The
//! [`ReconciliationWorker`] replays the write with exponential backoff
//! until it is applied, superseded, or the attempt budget runs out.
//! Every attempt is audited. Writes must be idempotent.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use warden_core::error::WardenResult;
use warden_core::models::audit::{AuditOutcome, CreateAuditLogEntry, events};
use warden_core::repository::AuditLogRepository;

use crate::action::ActionContext;
use crate::audit::AuditLogger;

/// Backoff policy for reconciliation retries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts per job (default: 5).
    pub max_attempts: u32,
    /// Delay before the first attempt in milliseconds (default: 500).
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each attempt (default: 2.0).
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay in milliseconds (default: 30 s).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Result of a single reconciliation write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write took effect (or had already taken effect).
    Applied,
    /// The record moved to a state where the write no longer applies.
    /// Retrying cannot help.
    Superseded(String),
}

pub type WriteFuture = Pin<Box<dyn Future<Output = WardenResult<WriteOutcome>> + Send>>;

/// A deferred write together with the challenge it belongs to.
pub struct ReconciliationJob {
    /// Short name of the write, e.g. `refund.post_flight`.
    pub label: &'static str,
    pub context: ActionContext,
    /// Snapshot recorded with every retry audit entry.
    pub metadata: serde_json::Value,
    pub write: Arc<dyn Fn() -> WriteFuture + Send + Sync>,
}

impl fmt::Debug for ReconciliationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationJob")
            .field("label", &self.label)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Handle used by action handlers to enqueue jobs. Never blocks.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    tx: mpsc::UnboundedSender<ReconciliationJob>,
}

impl RetryScheduler {
    /// Enqueue a job. Returns `false` if the worker has shut down.
    pub fn schedule(&self, job: ReconciliationJob) -> bool {
        let label = job.label;
        let challenge_id = job.context.challenge_id;
        match self.tx.send(job) {
            Ok(()) => {
                info!(%challenge_id, label, "Reconciliation scheduled");
                true
            }
            Err(_) => {
                error!(
                    %challenge_id,
                    label,
                    "Reconciliation worker is gone, write must be reconciled manually"
                );
                false
            }
        }
    }
}

pub struct ReconciliationWorker<A: AuditLogRepository + 'static> {
    policy: RetryPolicy,
    audit: AuditLogger<A>,
    rx: mpsc::UnboundedReceiver<ReconciliationJob>,
}

impl<A: AuditLogRepository + 'static> ReconciliationWorker<A> {
    pub fn new(policy: RetryPolicy, audit: AuditLogger<A>) -> (RetryScheduler, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RetryScheduler { tx }, Self { policy, audit, rx })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process jobs until every [`RetryScheduler`] is dropped, then wait
    /// for in-flight jobs to finish.
    pub async fn run(mut self) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                job = self.rx.recv() => match job {
                    Some(job) => {
                        tasks.spawn(run_job(job, self.policy.clone(), self.audit.clone()));
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Reconciliation task panicked");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Reconciliation task panicked");
            }
        }
        info!("Reconciliation worker stopped");
    }
}

async fn run_job<A: AuditLogRepository>(
    job: ReconciliationJob,
    policy: RetryPolicy,
    audit: AuditLogger<A>,
) {
    let max_attempts = policy.max_attempts.max(1);
    let ctx = &job.context;

    for attempt in 1..=max_attempts {
        tokio::time::sleep(policy.delay_for(attempt)).await;

        let result = (job.write)().await;
        let (outcome, detail, done) = match &result {
            Ok(WriteOutcome::Applied) => (
                AuditOutcome::Succeeded,
                format!("{}: applied on attempt {attempt}/{max_attempts}", job.label),
                true,
            ),
            Ok(WriteOutcome::Superseded(reason)) => (
                AuditOutcome::Rejected,
                format!(
                    "{}: superseded on attempt {attempt}/{max_attempts}: {reason}",
                    job.label
                ),
                true,
            ),
            Err(e) => (
                AuditOutcome::Failed,
                format!("{}: attempt {attempt}/{max_attempts} failed: {e}", job.label),
                false,
            ),
        };

        match &result {
            Ok(WriteOutcome::Applied) => {
                info!(challenge_id = %ctx.challenge_id, label = job.label, attempt, "Reconciliation applied")
            }
            Ok(WriteOutcome::Superseded(_)) => {
                warn!(challenge_id = %ctx.challenge_id, label = job.label, attempt, %detail, "Reconciliation superseded")
            }
            Err(_) => {
                warn!(challenge_id = %ctx.challenge_id, label = job.label, attempt, %detail, "Reconciliation attempt failed")
            }
        }

        audit
            .record(CreateAuditLogEntry {
                challenge_id: ctx.challenge_id,
                owner_id: ctx.owner_id.clone(),
                action_id: Some(ctx.action_id.clone()),
                event: events::RECONCILIATION_RETRY.into(),
                outcome,
                detail: Some(detail),
                metadata: job.metadata.clone(),
            })
            .await;

        if done {
            return;
        }
    }

    error!(
        challenge_id = %ctx.challenge_id,
        label = job.label,
        max_attempts,
        "Reconciliation attempts exhausted, manual reconciliation required"
    );
}
