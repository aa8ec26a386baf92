//! Integration tests for the refund action behind a challenge.

mod common;

use std::time::Duration;

use serde_json::json;
use warden_core::models::audit::{AuditOutcome, events};
use warden_core::models::booking::{BookingStatus, CreateBooking, RefundStatus};
use warden_core::repository::BookingRepository;
use warden_gate::actions::REFUND_ACTION_ID;
use warden_gate::{ActionOutcome, ChallengeError, VerifyOutput};

use common::{
    Harness, audit_entries, issue_input, setup, verify_input, wait_for_audit, wait_for_booking,
};

async fn seed_booking(h: &Harness, status: BookingStatus) {
    h.bookings
        .create(CreateBooking {
            id: "R1".into(),
            payment_id: "P1".into(),
            amount: 10_000,
            currency: "INR".into(),
            status,
        })
        .await
        .unwrap();
}

/// Issue a REFUND challenge for U1 and verify it with the delivered
/// code.
async fn refund_with(h: &Harness, metadata: serde_json::Value) -> (uuid::Uuid, VerifyOutput) {
    let issued = h
        .service
        .issue(issue_input("U1", Some(REFUND_ACTION_ID), metadata))
        .await
        .unwrap();
    let code = h.delivery.last_code();
    let output = h
        .service
        .verify(verify_input(issued.challenge_id, &code))
        .await
        .unwrap();
    (issued.challenge_id, output)
}

fn p1_r1() -> serde_json::Value {
    json!({ "paymentId": "P1", "recordId": "R1" })
}

#[tokio::test]
async fn refund_runs_once_and_reconciles_the_booking() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Confirmed).await;

    let issued = h
        .service
        .issue(issue_input("U1", Some(REFUND_ACTION_ID), p1_r1()))
        .await
        .unwrap();
    let code = h.delivery.last_code();

    let output = h
        .service
        .verify(verify_input(issued.challenge_id, &code))
        .await
        .unwrap();
    assert_eq!(output.outcome, ActionOutcome::Succeeded, "{:?}", output.detail);

    let booking = h.bookings.get_by_id("R1").await.unwrap();
    assert_eq!(booking.refund_status, RefundStatus::Refunded);
    assert_eq!(booking.refund_reference.as_deref(), Some("rfnd_1"));
    assert_eq!(booking.gateway_status.as_deref(), Some("processed"));
    assert_eq!(booking.refund_amount, Some(10_000));
    assert!(booking.refunded_at.is_some());

    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "P1");
    assert_eq!(calls[0].1.idempotency_key, "refund:P1:R1");
    assert_eq!(calls[0].1.amount, None);

    // Replaying the same code does nothing.
    let err = h
        .service
        .verify(verify_input(issued.challenge_id, &code))
        .await
        .unwrap_err();
    assert!(matches!(err, ChallengeError::AlreadyConsumed));
    assert_eq!(h.gateway.calls().len(), 1);

    let verify_entries: Vec<_> = audit_entries(&h, issued.challenge_id)
        .await
        .into_iter()
        .filter(|e| e.event == events::CHALLENGE_VERIFY)
        .collect();
    assert_eq!(verify_entries.len(), 2);
    assert_eq!(verify_entries[0].outcome, AuditOutcome::Succeeded);
    assert_eq!(verify_entries[0].action_id.as_deref(), Some(REFUND_ACTION_ID));
    assert_eq!(verify_entries[0].metadata["paymentId"], "P1");
    assert_eq!(verify_entries[1].outcome, AuditOutcome::Denied);
}

#[tokio::test]
async fn partial_refund_passes_amount_and_notes() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Completed).await;

    let (_, output) = refund_with(
        &h,
        json!({
            "paymentId": "P1",
            "recordId": "R1",
            "amount": 2_500,
            "notes": { "reason": "late delivery" }
        }),
    )
    .await;
    assert_eq!(output.outcome, ActionOutcome::Succeeded);

    let calls = h.gateway.calls();
    assert_eq!(calls[0].1.amount, Some(2_500));
    assert_eq!(calls[0].1.notes, Some(json!({ "reason": "late delivery" })));

    let booking = h.bookings.get_by_id("R1").await.unwrap();
    assert_eq!(booking.refund_amount, Some(2_500));
}

#[tokio::test]
async fn rejection_is_terminal_and_never_retried() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Cancelled).await;

    let (challenge_id, output) = refund_with(&h, p1_r1()).await;
    assert_eq!(output.outcome, ActionOutcome::Rejected);
    assert!(output.detail.unwrap().contains("cancelled"));
    assert!(h.gateway.calls().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let retries = audit_entries(&h, challenge_id)
        .await
        .into_iter()
        .filter(|e| e.event == events::RECONCILIATION_RETRY)
        .count();
    assert_eq!(retries, 0);

    let booking = h.bookings.get_by_id("R1").await.unwrap();
    assert_eq!(booking.refund_status, RefundStatus::None);
}

#[tokio::test]
async fn business_rules_reject_before_any_gateway_call() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Confirmed).await;

    let cases = [
        json!({ "paymentId": "P2", "recordId": "R1" }),
        json!({ "paymentId": "P1", "recordId": "R1", "amount": 10_001 }),
        json!({ "paymentId": "P1", "recordId": "R1", "amount": -5 }),
        json!({ "paymentId": "P1", "recordId": "R404" }),
        json!({ "recordId": "R1" }),
    ];
    for metadata in cases {
        let (_, output) = refund_with(&h, metadata.clone()).await;
        assert_eq!(output.outcome, ActionOutcome::Rejected, "{metadata}");
    }

    assert!(h.gateway.calls().is_empty());
    let booking = h.bookings.get_by_id("R1").await.unwrap();
    assert_eq!(booking.refund_status, RefundStatus::None);
}

#[tokio::test]
async fn already_refunded_booking_is_rejected() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Confirmed).await;

    let (_, first) = refund_with(&h, p1_r1()).await;
    assert_eq!(first.outcome, ActionOutcome::Succeeded);

    let (_, second) = refund_with(&h, p1_r1()).await;
    assert_eq!(second.outcome, ActionOutcome::Rejected);
    assert!(second.detail.unwrap().contains("already been refunded"));
    assert_eq!(h.gateway.calls().len(), 1);
}

#[tokio::test]
async fn unaccepted_gateway_status_fails_without_post_flight_write() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Confirmed).await;
    h.gateway.set_status("failed");

    let (_, output) = refund_with(&h, p1_r1()).await;
    assert_eq!(output.outcome, ActionOutcome::Failed);
    assert!(output.detail.unwrap().contains("failed"));

    let booking = h.bookings.get_by_id("R1").await.unwrap();
    assert_eq!(booking.refund_status, RefundStatus::InProgress);
    assert!(booking.refund_reference.is_none());
    assert!(booking.refunded_at.is_none());
}

#[tokio::test]
async fn failed_refund_can_be_retried_with_a_new_challenge() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Confirmed).await;

    h.gateway.fail_calls(true);
    let (_, first) = refund_with(&h, p1_r1()).await;
    assert_eq!(first.outcome, ActionOutcome::Failed);

    h.gateway.fail_calls(false);
    let (_, second) = refund_with(&h, p1_r1()).await;
    assert_eq!(second.outcome, ActionOutcome::Succeeded);

    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1.idempotency_key, calls[1].1.idempotency_key);

    let booking = h.bookings.get_by_id("R1").await.unwrap();
    assert_eq!(booking.refund_status, RefundStatus::Refunded);
    assert_eq!(booking.refund_reference.as_deref(), Some("rfnd_2"));
}

#[tokio::test]
async fn gateway_timeout_is_a_failure() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Confirmed).await;
    h.gateway.set_delay(Some(Duration::from_millis(1_000)));

    let (_, output) = refund_with(&h, p1_r1()).await;
    assert_eq!(output.outcome, ActionOutcome::Failed);
    assert!(output.detail.unwrap().contains("timed out"));

    let booking = h.bookings.get_by_id("R1").await.unwrap();
    assert_ne!(booking.refund_status, RefundStatus::Refunded);
}

#[tokio::test]
async fn post_flight_failure_is_reconciled_in_the_background() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Confirmed).await;
    // The inline write and the first background attempt both fail.
    h.faults.fail_next_completes(2);

    let (challenge_id, output) = refund_with(&h, p1_r1()).await;
    assert_eq!(output.outcome, ActionOutcome::Failed);
    let detail = output.detail.unwrap();
    assert!(detail.contains("rfnd_1"));
    assert!(detail.contains("not yet consistent"));

    let booking = wait_for_booking(&h, "R1", |b| b.refund_status == RefundStatus::Refunded).await;
    assert_eq!(booking.refund_reference.as_deref(), Some("rfnd_1"));
    assert_eq!(h.gateway.calls().len(), 1);

    let retries = wait_for_audit(&h, challenge_id, events::RECONCILIATION_RETRY, 2).await;
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[0].outcome, AuditOutcome::Failed);
    assert_eq!(retries[1].outcome, AuditOutcome::Succeeded);
    assert!(retries[1].detail.as_deref().unwrap().contains("refund.post_flight"));
}

#[tokio::test]
async fn reconciliation_gives_up_after_max_attempts() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Confirmed).await;
    // The inline write plus every background attempt, and one spare.
    h.faults.fail_next_completes(7);

    let (challenge_id, output) = refund_with(&h, p1_r1()).await;
    assert_eq!(output.outcome, ActionOutcome::Failed);
    assert!(output.detail.unwrap().contains("not yet consistent"));

    let retries = wait_for_audit(&h, challenge_id, events::RECONCILIATION_RETRY, 5).await;
    assert_eq!(retries.len(), 5);
    assert!(retries.iter().all(|e| e.outcome == AuditOutcome::Failed));
    assert!(retries[4].detail.as_deref().unwrap().contains("attempt 5/5"));

    // Longer than the widest backoff; no sixth attempt may appear.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let retries: Vec<_> = audit_entries(&h, challenge_id)
        .await
        .into_iter()
        .filter(|e| e.event == events::RECONCILIATION_RETRY)
        .collect();
    assert_eq!(retries.len(), 5);

    let booking = h.bookings.get_by_id("R1").await.unwrap();
    assert_eq!(booking.refund_status, RefundStatus::InProgress);
    assert_eq!(booking.refund_reference, None);
    assert_eq!(h.gateway.calls().len(), 1);
}

#[tokio::test]
async fn superseded_post_flight_write_needs_manual_reconciliation() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Confirmed).await;
    h.faults.complete_first_with("rfnd_other");

    let (challenge_id, output) = refund_with(&h, p1_r1()).await;
    assert_eq!(output.outcome, ActionOutcome::Failed);
    let detail = output.detail.unwrap();
    assert!(detail.contains("rfnd_1"), "{detail}");
    assert!(detail.contains("manual reconciliation required"), "{detail}");

    let booking = h.bookings.get_by_id("R1").await.unwrap();
    assert_eq!(booking.refund_status, RefundStatus::Refunded);
    assert_eq!(booking.refund_reference.as_deref(), Some("rfnd_other"));

    // Nothing is queued for a superseded write.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let entries = audit_entries(&h, challenge_id).await;
    assert!(entries.iter().all(|e| e.event != events::RECONCILIATION_RETRY));
}

#[tokio::test]
async fn pre_flight_failure_is_retried_without_calling_the_gateway() {
    let h = setup().await;
    seed_booking(&h, BookingStatus::Confirmed).await;
    h.faults.fail_next_begins(1);

    let (challenge_id, output) = refund_with(&h, p1_r1()).await;
    assert_eq!(output.outcome, ActionOutcome::Failed);
    assert!(output.detail.unwrap().contains("will be retried"));
    assert!(h.gateway.calls().is_empty());

    wait_for_booking(&h, "R1", |b| b.refund_status == RefundStatus::InProgress).await;
    let retries = wait_for_audit(&h, challenge_id, events::RECONCILIATION_RETRY, 1).await;
    assert_eq!(retries[0].outcome, AuditOutcome::Succeeded);
}
