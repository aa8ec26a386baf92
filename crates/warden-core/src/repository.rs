//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Mutations that guard
//! at-most-once semantics are expressed as single conditional updates
//! so that implementations can make them atomic.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::WardenResult;
use crate::models::{
    audit::{AuditLogEntry, CreateAuditLogEntry},
    booking::{Booking, CompleteRefund, CreateBooking},
    challenge::{Challenge, CreateChallenge},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

pub trait ChallengeRepository: Send + Sync {
    fn create(&self, input: CreateChallenge)
    -> impl Future<Output = WardenResult<Challenge>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = WardenResult<Challenge>> + Send;

    /// Flip `consumed` from false to true in a single conditional
    /// update that also requires `retry_count < max_retries` and
    /// `expires_at` in the future.
    ///
    /// Returns `Ok(true)` only for the caller whose update performed the
    /// transition; every other caller gets `Ok(false)`.
    fn try_consume(&self, id: Uuid) -> impl Future<Output = WardenResult<bool>> + Send;

    /// Atomically increment `retry_count` of an unconsumed challenge
    /// whose budget is not yet exhausted, and return the stored state
    /// afterwards. A challenge that no longer qualifies is returned
    /// unchanged.
    fn record_failed_attempt(&self, id: Uuid)
    -> impl Future<Output = WardenResult<Challenge>> + Send;

    /// Number of challenges issued for `owner_id` at or after `since`.
    fn count_created_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = WardenResult<u64>> + Send;

    /// Remove challenges created before `cutoff` (retention window).
    fn purge_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = WardenResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Audit (append-only)
// ---------------------------------------------------------------------------

/// Query filters for audit log entries.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub challenge_id: Option<Uuid>,
    pub owner_id: Option<String>,
    pub event: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub trait AuditLogRepository: Send + Sync {
    /// Append a new audit log entry. No update operation exists.
    fn append(
        &self,
        input: CreateAuditLogEntry,
    ) -> impl Future<Output = WardenResult<AuditLogEntry>> + Send;
    fn list(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> impl Future<Output = WardenResult<PaginatedResult<AuditLogEntry>>> + Send;
    /// Remove entries older than `cutoff` (retention window).
    fn purge_before(&self, cutoff: DateTime<Utc>)
    -> impl Future<Output = WardenResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Bookings (internal record store used by the refund action)
// ---------------------------------------------------------------------------

pub trait BookingRepository: Send + Sync {
    fn create(&self, input: CreateBooking) -> impl Future<Output = WardenResult<Booking>> + Send;
    fn get_by_id(&self, id: &str) -> impl Future<Output = WardenResult<Booking>> + Send;

    /// Mark the booking's refund as in progress, only if the booking
    /// still belongs to `payment_id`, is not cancelled and has not been
    /// refunded. Re-marking an in-progress refund is allowed.
    ///
    /// Returns `Ok(None)` when the condition did not hold.
    fn begin_refund(
        &self,
        id: &str,
        payment_id: &str,
        requested_at: DateTime<Utc>,
    ) -> impl Future<Output = WardenResult<Option<Booking>>> + Send;

    /// Record a gateway refund on the booking, only if the refund is in
    /// progress or was already completed with the same reference.
    ///
    /// Returns `Ok(None)` when the condition did not hold.
    fn complete_refund(
        &self,
        id: &str,
        input: CompleteRefund,
    ) -> impl Future<Output = WardenResult<Option<Booking>>> + Send;
}
