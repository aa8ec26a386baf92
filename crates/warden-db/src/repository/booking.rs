//! SurrealDB implementation of [`BookingRepository`].
//!
//! Refund state transitions are conditional updates; an update whose
//! `WHERE` clause no longer holds returns no row and is reported to the
//! caller as `None` instead of an error.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use warden_core::error::WardenResult;
use warden_core::models::booking::{
    Booking, BookingStatus, CompleteRefund, CreateBooking, RefundStatus,
};
use warden_core::repository::BookingRepository;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct BookingRow {
    payment_id: String,
    amount: i64,
    currency: String,
    status: String,
    refund_status: String,
    refund_reference: Option<String>,
    gateway_status: Option<String>,
    refund_amount: Option<i64>,
    refund_requested_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_status(s: &str) -> Result<BookingStatus, DbError> {
    match s {
        "Confirmed" => Ok(BookingStatus::Confirmed),
        "Completed" => Ok(BookingStatus::Completed),
        "Cancelled" => Ok(BookingStatus::Cancelled),
        other => Err(DbError::Decode(format!("unknown booking status: {other}"))),
    }
}

fn status_to_string(s: &BookingStatus) -> &'static str {
    match s {
        BookingStatus::Confirmed => "Confirmed",
        BookingStatus::Completed => "Completed",
        BookingStatus::Cancelled => "Cancelled",
    }
}

fn parse_refund_status(s: &str) -> Result<RefundStatus, DbError> {
    match s {
        "None" => Ok(RefundStatus::None),
        "InProgress" => Ok(RefundStatus::InProgress),
        "Refunded" => Ok(RefundStatus::Refunded),
        other => Err(DbError::Decode(format!("unknown refund status: {other}"))),
    }
}

impl BookingRow {
    fn into_booking(self, id: &str) -> Result<Booking, DbError> {
        Ok(Booking {
            id: id.to_string(),
            payment_id: self.payment_id,
            amount: self.amount,
            currency: self.currency,
            status: parse_status(&self.status)?,
            refund_status: parse_refund_status(&self.refund_status)?,
            refund_reference: self.refund_reference,
            gateway_status: self.gateway_status,
            refund_amount: self.refund_amount,
            refund_requested_at: self.refund_requested_at,
            refunded_at: self.refunded_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the Booking repository.
#[derive(Clone)]
pub struct SurrealBookingRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealBookingRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> BookingRepository for SurrealBookingRepository<C> {
    async fn create(&self, input: CreateBooking) -> WardenResult<Booking> {
        let result = self
            .db
            .query(
                "CREATE type::record('booking', $id) SET \
                 payment_id = $payment_id, \
                 amount = $amount, \
                 currency = $currency, \
                 status = $status, \
                 refund_status = 'None'",
            )
            .bind(("id", input.id.clone()))
            .bind(("payment_id", input.payment_id))
            .bind(("amount", input.amount))
            .bind(("currency", input.currency))
            .bind(("status", status_to_string(&input.status).to_string()))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<BookingRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "booking".into(),
            id: input.id.clone(),
        })?;

        Ok(row.into_booking(&input.id)?)
    }

    async fn get_by_id(&self, id: &str) -> WardenResult<Booking> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('booking', $id)")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<BookingRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "booking".into(),
            id: id.to_string(),
        })?;

        Ok(row.into_booking(id)?)
    }

    async fn begin_refund(
        &self,
        id: &str,
        payment_id: &str,
        requested_at: DateTime<Utc>,
    ) -> WardenResult<Option<Booking>> {
        let result = self
            .db
            .query(
                "UPDATE type::record('booking', $id) SET \
                 refund_status = 'InProgress', \
                 refund_requested_at = $requested_at, \
                 updated_at = $requested_at \
                 WHERE payment_id = $payment_id \
                 AND status != 'Cancelled' \
                 AND refund_status IN ['None', 'InProgress']",
            )
            .bind(("id", id.to_string()))
            .bind(("payment_id", payment_id.to_string()))
            .bind(("requested_at", requested_at))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<BookingRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(|row| row.into_booking(id))
            .transpose()
            .map_err(Into::into)
    }

    async fn complete_refund(
        &self,
        id: &str,
        input: CompleteRefund,
    ) -> WardenResult<Option<Booking>> {
        let result = self
            .db
            .query(
                "UPDATE type::record('booking', $id) SET \
                 refund_status = 'Refunded', \
                 refund_reference = $refund_reference, \
                 gateway_status = $gateway_status, \
                 refund_amount = $refund_amount, \
                 refunded_at = $refunded_at, \
                 updated_at = $refunded_at \
                 WHERE refund_status = 'InProgress' \
                 OR (refund_status = 'Refunded' \
                     AND refund_reference = $refund_reference)",
            )
            .bind(("id", id.to_string()))
            .bind(("refund_reference", input.refund_reference))
            .bind(("gateway_status", input.gateway_status))
            .bind(("refund_amount", input.refund_amount))
            .bind(("refunded_at", input.refunded_at))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<BookingRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(|row| row.into_booking(id))
            .transpose()
            .map_err(Into::into)
    }
}
