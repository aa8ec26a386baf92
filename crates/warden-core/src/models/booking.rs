//! Booking domain model, the internal record a refund reconciles
//! against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BookingStatus {
    Confirmed,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RefundStatus {
    None,
    InProgress,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: String,
    pub payment_id: String,
    /// Captured amount in minor currency units.
    pub amount: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub refund_status: RefundStatus,
    /// Gateway-side refund identifier, once known.
    pub refund_reference: Option<String>,
    /// Last status reported by the gateway for the refund.
    pub gateway_status: Option<String>,
    pub refund_amount: Option<i64>,
    pub refund_requested_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBooking {
    /// Caller-chosen record identifier.
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: BookingStatus,
}

/// Payload of the post-flight reconciliation write.
///
/// Every field is fixed when the payload is built, so applying the same
/// payload more than once leaves the record in the same state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompleteRefund {
    pub refund_reference: String,
    pub gateway_status: String,
    pub refund_amount: i64,
    pub refunded_at: DateTime<Utc>,
}
