//! Best-effort audit logging.
//!
//! Audit appends never fail the operation being audited. Failures are
//! logged and counted; once consecutive failures reach the configured
//! threshold every further failure is logged at error level until an
//! append succeeds again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, warn};
use warden_core::models::audit::CreateAuditLogEntry;
use warden_core::repository::AuditLogRepository;

pub struct AuditLogger<A: AuditLogRepository> {
    repo: Arc<A>,
    consecutive_failures: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    alert_threshold: u64,
}

impl<A: AuditLogRepository> Clone for AuditLogger<A> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            consecutive_failures: Arc::clone(&self.consecutive_failures),
            total_failures: Arc::clone(&self.total_failures),
            alert_threshold: self.alert_threshold,
        }
    }
}

impl<A: AuditLogRepository> AuditLogger<A> {
    pub fn new(repo: A, alert_threshold: u32) -> Self {
        Self {
            repo: Arc::new(repo),
            consecutive_failures: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            alert_threshold: u64::from(alert_threshold.max(1)),
        }
    }

    /// Append an entry, swallowing any store error.
    pub async fn record(&self, entry: CreateAuditLogEntry) {
        let challenge_id = entry.challenge_id;
        let event = entry.event.clone();

        match self.repo.append(entry).await {
            Ok(_) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                let consecutive = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if consecutive >= self.alert_threshold {
                    error!(
                        %challenge_id,
                        event,
                        consecutive,
                        error = %e,
                        "Audit log unavailable, entries are being dropped"
                    );
                } else {
                    warn!(%challenge_id, event, error = %e, "Failed to append audit entry");
                }
            }
        }
    }

    /// Total number of entries that could not be appended.
    pub fn failure_count(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Current run of consecutive append failures.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn repository(&self) -> &A {
        &self.repo
    }
}
