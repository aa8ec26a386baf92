//! Refund action: refund a captured payment through the payment gateway
//! and reconcile the booking it belongs to.
//!
//! The handler runs in three phases:
//!
//! 1. **Pre-flight**: load the booking, apply the refund rules, and
//!    mark the refund as in progress with a conditional update.
//! 2. **Gateway call**: request the refund under a timeout with an
//!    idempotency key derived from the payment and booking ids.
//! 3. **Post-flight**: record the gateway result on the booking with a
//!    conditional, replayable update.
//!
//! A write that fails after the gateway accepted the refund is handed to
//! the reconciliation worker; the caller sees `Failed` with a note that
//! internal state is not yet consistent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use warden_core::error::WardenError;
use warden_core::models::booking::{Booking, BookingStatus, CompleteRefund, RefundStatus};
use warden_core::repository::BookingRepository;

use crate::action::{ActionContext, ActionExecutionResult, ActionHandler};
use crate::gateway::{PaymentGateway, RefundRequest};
use crate::reconcile::{ReconciliationJob, RetryScheduler, WriteFuture, WriteOutcome};

pub const REFUND_ACTION_ID: &str = "REFUND";

/// Parameters carried in the challenge metadata.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefundParams {
    pub payment_id: String,
    pub record_id: String,
    /// Partial refund amount in minor units. Full refund when absent.
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub notes: Option<serde_json::Value>,
}

impl RefundParams {
    pub fn from_metadata(metadata: &serde_json::Value) -> Result<Self, String> {
        let params: Self = serde_json::from_value(metadata.clone())
            .map_err(|e| format!("invalid refund parameters: {e}"))?;
        if params.payment_id.trim().is_empty() {
            return Err("paymentId must not be empty".into());
        }
        if params.record_id.trim().is_empty() {
            return Err("recordId must not be empty".into());
        }
        Ok(params)
    }

    /// Gateway idempotency key. Stable across retries of the same
    /// refund.
    pub fn idempotency_key(&self) -> String {
        format!("refund:{}:{}", self.payment_id, self.record_id)
    }
}

/// Business rules that make a refund impossible. `None` means the refund
/// may proceed.
fn refund_rejection(booking: &Booking, params: &RefundParams) -> Option<String> {
    if booking.payment_id != params.payment_id {
        return Some(format!(
            "payment {} does not belong to booking {}",
            params.payment_id, booking.id
        ));
    }
    if booking.status == BookingStatus::Cancelled {
        return Some(format!("booking {} is cancelled", booking.id));
    }
    if booking.refund_status == RefundStatus::Refunded {
        return Some(format!("booking {} has already been refunded", booking.id));
    }
    match params.amount {
        Some(amount) if amount <= 0 => Some(format!("refund amount must be positive, got {amount}")),
        Some(amount) if amount > booking.amount => Some(format!(
            "refund amount {amount} exceeds booking amount {}",
            booking.amount
        )),
        _ => None,
    }
}

pub struct RefundHandler<B: BookingRepository + 'static> {
    bookings: Arc<B>,
    gateway: Arc<dyn PaymentGateway>,
    scheduler: RetryScheduler,
    gateway_timeout: Duration,
}

impl<B: BookingRepository + 'static> RefundHandler<B> {
    pub fn new(
        bookings: B,
        gateway: Arc<dyn PaymentGateway>,
        scheduler: RetryScheduler,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            bookings: Arc::new(bookings),
            gateway,
            scheduler,
            gateway_timeout,
        }
    }

    fn begin_refund_write(&self, params: &RefundParams) -> Arc<dyn Fn() -> WriteFuture + Send + Sync> {
        let bookings = Arc::clone(&self.bookings);
        let record_id = params.record_id.clone();
        let payment_id = params.payment_id.clone();
        let requested_at = Utc::now();

        Arc::new(move || -> WriteFuture {
            let bookings = Arc::clone(&bookings);
            let record_id = record_id.clone();
            let payment_id = payment_id.clone();
            Box::pin(async move {
                let updated = bookings
                    .begin_refund(&record_id, &payment_id, requested_at)
                    .await?;
                Ok::<_, WardenError>(match updated {
                    Some(_) => WriteOutcome::Applied,
                    None => WriteOutcome::Superseded(format!(
                        "booking {record_id} is no longer refundable"
                    )),
                })
            })
        })
    }

    fn complete_refund_write(
        &self,
        record_id: &str,
        payload: CompleteRefund,
    ) -> Arc<dyn Fn() -> WriteFuture + Send + Sync> {
        let bookings = Arc::clone(&self.bookings);
        let record_id = record_id.to_string();

        Arc::new(move || -> WriteFuture {
            let bookings = Arc::clone(&bookings);
            let record_id = record_id.clone();
            let payload = payload.clone();
            Box::pin(async move {
                let updated = bookings.complete_refund(&record_id, payload).await?;
                Ok::<_, WardenError>(match updated {
                    Some(_) => WriteOutcome::Applied,
                    None => WriteOutcome::Superseded(format!(
                        "booking {record_id} refund state changed before reconciliation"
                    )),
                })
            })
        })
    }

    fn schedule(
        &self,
        label: &'static str,
        ctx: &ActionContext,
        metadata: &serde_json::Value,
        write: Arc<dyn Fn() -> WriteFuture + Send + Sync>,
    ) -> bool {
        self.scheduler.schedule(ReconciliationJob {
            label,
            context: ctx.clone(),
            metadata: metadata.clone(),
            write,
        })
    }
}

#[async_trait]
impl<B: BookingRepository + 'static> ActionHandler for RefundHandler<B> {
    async fn execute(
        &self,
        ctx: &ActionContext,
        metadata: &serde_json::Value,
    ) -> Result<ActionExecutionResult, WardenError> {
        let params = match RefundParams::from_metadata(metadata) {
            Ok(params) => params,
            Err(reason) => return Ok(ActionExecutionResult::rejected(reason)),
        };
        let payment_id = params.payment_id.as_str();
        let record_id = params.record_id.as_str();

        // Pre-flight
        let booking = match self.bookings.get_by_id(record_id).await {
            Ok(booking) => booking,
            Err(WardenError::NotFound { .. }) => {
                return Ok(ActionExecutionResult::rejected(format!(
                    "booking {record_id} not found"
                )));
            }
            Err(e) => {
                warn!(payment_id, record_id, phase = "pre-flight", error = %e, "Could not load booking");
                return Ok(ActionExecutionResult::failed(format!(
                    "could not load booking {record_id}: {e}"
                )));
            }
        };

        if let Some(reason) = refund_rejection(&booking, &params) {
            info!(payment_id, record_id, %reason, "Refund rejected");
            return Ok(ActionExecutionResult::rejected(reason));
        }

        let begin = self.begin_refund_write(&params);
        match begin().await {
            Ok(WriteOutcome::Applied) => {}
            Ok(WriteOutcome::Superseded(reason)) => {
                info!(payment_id, record_id, %reason, "Refund rejected at pre-flight write");
                return Ok(ActionExecutionResult::rejected(reason));
            }
            Err(e) => {
                warn!(payment_id, record_id, phase = "pre-flight", error = %e, "Pre-flight write failed");
                self.schedule("refund.pre_flight", ctx, metadata, begin);
                return Ok(ActionExecutionResult::failed(format!(
                    "pre-flight write failed: {e}; not yet applied, will be retried"
                )));
            }
        }

        // Gateway call
        let request = RefundRequest {
            idempotency_key: params.idempotency_key(),
            amount: params.amount,
            notes: params.notes.clone(),
        };
        let response =
            match tokio::time::timeout(self.gateway_timeout, self.gateway.refund(payment_id, &request))
                .await
            {
                Err(_) => {
                    warn!(payment_id, record_id, phase = "gateway", "Gateway call timed out");
                    return Ok(ActionExecutionResult::failed(format!(
                        "gateway call timed out after {:?}",
                        self.gateway_timeout
                    )));
                }
                Ok(Err(e)) => {
                    warn!(payment_id, record_id, phase = "gateway", error = %e, "Gateway call failed");
                    return Ok(ActionExecutionResult::failed(format!("gateway error: {e}")));
                }
                Ok(Ok(response)) => response,
            };

        if !response.is_accepted() {
            warn!(
                payment_id,
                record_id,
                phase = "gateway",
                status = %response.status,
                "Gateway did not accept refund"
            );
            return Ok(ActionExecutionResult::failed(format!(
                "gateway returned refund status '{}'",
                response.status
            )));
        }

        // Post-flight
        let payload = CompleteRefund {
            refund_reference: response.external_reference_id.clone(),
            gateway_status: response.status.clone(),
            refund_amount: params.amount.unwrap_or(booking.amount),
            refunded_at: Utc::now(),
        };
        let complete = self.complete_refund_write(record_id, payload);
        match complete().await {
            Ok(WriteOutcome::Applied) => {
                info!(
                    payment_id,
                    record_id,
                    refund_reference = %response.external_reference_id,
                    status = %response.status,
                    "Refund completed"
                );
                Ok(ActionExecutionResult::succeeded_with(format!(
                    "refund {} {}",
                    response.external_reference_id, response.status
                )))
            }
            Ok(WriteOutcome::Superseded(reason)) => {
                warn!(payment_id, record_id, phase = "post-flight", %reason, "Post-flight write superseded");
                Ok(ActionExecutionResult::failed(format!(
                    "gateway refund {} succeeded but {reason}; manual reconciliation required",
                    response.external_reference_id
                )))
            }
            Err(e) => {
                warn!(payment_id, record_id, phase = "post-flight", error = %e, "Post-flight write failed");
                self.schedule("refund.post_flight", ctx, metadata, complete);
                Ok(ActionExecutionResult::failed(format!(
                    "gateway refund {} succeeded, internal state not yet consistent; reconciliation scheduled",
                    response.external_reference_id
                )))
            }
        }
    }
}
