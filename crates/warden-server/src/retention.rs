//! Periodic purge of challenges and audit entries past the retention
//! window.

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use warden_core::error::WardenResult;
use warden_core::repository::{AuditLogRepository, ChallengeRepository};

use crate::config::RetentionConfig;

/// Everything created before the returned instant is purged.
pub fn cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(retention_days))
}

/// Run one purge. Returns `(challenges, audit_entries)` removed.
pub async fn sweep<C, A>(challenges: &C, audit: &A, retention_days: u32) -> WardenResult<(u64, u64)>
where
    C: ChallengeRepository,
    A: AuditLogRepository,
{
    let cutoff = cutoff(Utc::now(), retention_days);
    let purged_challenges = challenges.purge_created_before(cutoff).await?;
    let purged_entries = audit.purge_before(cutoff).await?;
    Ok((purged_challenges, purged_entries))
}

pub fn spawn<C, A>(challenges: C, audit: A, config: RetentionConfig) -> JoinHandle<()>
where
    C: ChallengeRepository + 'static,
    A: AuditLogRepository + 'static,
{
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(config.sweep_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match sweep(&challenges, &audit, config.retention_days).await {
                Ok((purged_challenges, purged_entries)) => {
                    if purged_challenges + purged_entries > 0 {
                        info!(purged_challenges, purged_entries, "Retention sweep completed");
                    }
                }
                Err(e) => warn!(error = %e, "Retention sweep failed"),
            }
        }
    })
}
