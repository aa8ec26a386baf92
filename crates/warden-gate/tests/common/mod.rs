//! Shared harness for challenge service integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use warden_core::error::{WardenError, WardenResult};
use warden_core::models::audit::AuditLogEntry;
use warden_core::models::booking::{Booking, CompleteRefund, CreateBooking};
use warden_core::repository::{AuditLogFilter, AuditLogRepository, BookingRepository, Pagination};
use warden_db::repository::{
    SurrealAuditLogRepository, SurrealBookingRepository, SurrealChallengeRepository,
};
use warden_gate::actions::{REFUND_ACTION_ID, RefundHandler};
use warden_gate::config::CodeHashParams;
use warden_gate::delivery::{DeliveryError, DeliveryProvider};
use warden_gate::gateway::{GatewayError, PaymentGateway, RefundRequest, RefundResponse};
use warden_gate::reconcile::{ReconciliationWorker, RetryPolicy};
use warden_gate::{
    ActionRegistry, ActionRegistryBuilder, AuditLogger, ChallengeService, GateConfig,
    IssueChallenge, VerifyChallenge,
};

pub type Service = ChallengeService<SurrealChallengeRepository<Db>, SurrealAuditLogRepository<Db>>;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Records every code it is asked to deliver.
#[derive(Clone, Default)]
pub struct CapturingDelivery {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    fail: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl CapturingDelivery {
    pub fn last_code(&self) -> String {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|(_, code)| code.clone())
            .expect("no code delivered")
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl DeliveryProvider for CapturingDelivery {
    fn name(&self) -> &'static str {
        "capturing"
    }

    async fn send(&self, destination: &str, code: &str) -> Result<(), DeliveryError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected("number unreachable".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), code.to_string()));
        Ok(())
    }
}

/// Payment gateway double with a configurable status, delay and
/// transport failure.
pub struct FakeGateway {
    calls: Mutex<Vec<(String, RefundRequest)>>,
    status: Mutex<String>,
    delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            status: Mutex::new("processed".into()),
            delay: Mutex::new(None),
            fail: AtomicBool::new(false),
        }
    }
}

impl FakeGateway {
    pub fn calls(&self) -> Vec<(String, RefundRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_status(&self, status: &str) {
        *self.status.lock().unwrap() = status.to_string();
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fail_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn refund(
        &self,
        payment_id: &str,
        request: &RefundRequest,
    ) -> Result<RefundResponse, GatewayError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((payment_id.to_string(), request.clone()));
            calls.len()
        };

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection reset".into()));
        }

        let status = self.status.lock().unwrap().clone();
        Ok(RefundResponse {
            status,
            external_reference_id: format!("rfnd_{call_number}"),
        })
    }
}

/// Injects store failures and concurrent writers into the refund
/// writes.
#[derive(Clone, Default)]
pub struct BookingFaults {
    begin: Arc<AtomicU32>,
    complete: Arc<AtomicU32>,
    competing_reference: Arc<Mutex<Option<String>>>,
}

impl BookingFaults {
    pub fn fail_next_begins(&self, n: u32) {
        self.begin.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_completes(&self, n: u32) {
        self.complete.store(n, Ordering::SeqCst);
    }

    /// Complete the refund under `reference` just before the next
    /// `complete_refund` call runs.
    pub fn complete_first_with(&self, reference: &str) {
        *self.competing_reference.lock().unwrap() = Some(reference.to_string());
    }
}

fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct FaultyBookings {
    inner: SurrealBookingRepository<Db>,
    faults: BookingFaults,
}

impl BookingRepository for FaultyBookings {
    async fn create(&self, input: CreateBooking) -> WardenResult<Booking> {
        self.inner.create(input).await
    }

    async fn get_by_id(&self, id: &str) -> WardenResult<Booking> {
        self.inner.get_by_id(id).await
    }

    async fn begin_refund(
        &self,
        id: &str,
        payment_id: &str,
        requested_at: DateTime<Utc>,
    ) -> WardenResult<Option<Booking>> {
        if take_fault(&self.faults.begin) {
            return Err(WardenError::Database("injected begin_refund failure".into()));
        }
        self.inner.begin_refund(id, payment_id, requested_at).await
    }

    async fn complete_refund(
        &self,
        id: &str,
        input: CompleteRefund,
    ) -> WardenResult<Option<Booking>> {
        if take_fault(&self.faults.complete) {
            return Err(WardenError::Database("injected complete_refund failure".into()));
        }
        let competing = self.faults.competing_reference.lock().unwrap().take();
        if let Some(reference) = competing {
            let other = CompleteRefund {
                refund_reference: reference,
                ..input.clone()
            };
            self.inner.complete_refund(id, other).await?;
        }
        self.inner.complete_refund(id, input).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub service: Service,
    pub db: Surreal<Db>,
    pub bookings: SurrealBookingRepository<Db>,
    pub challenges: SurrealChallengeRepository<Db>,
    pub audit_log: SurrealAuditLogRepository<Db>,
    pub delivery: CapturingDelivery,
    pub gateway: Arc<FakeGateway>,
    pub faults: BookingFaults,
}

pub fn test_config() -> GateConfig {
    GateConfig {
        challenge_lifetime_secs: 300,
        max_retries: 3,
        code_pepper: Some("test-pepper".into()),
        code_hash: CodeHashParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        },
        max_issued_per_window: 100,
        rate_window_secs: 900,
        delivery_timeout_ms: 1_000,
        gateway_timeout_ms: 200,
        reconciliation: RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 10,
            backoff_multiplier: 2.0,
            max_delay_ms: 100,
        },
        audit_failure_alert_threshold: 5,
    }
}

pub async fn setup() -> Harness {
    setup_with(test_config(), |builder| builder).await
}

/// Build a harness with the refund action registered plus whatever
/// `extra` adds.
pub async fn setup_with(
    config: GateConfig,
    extra: impl FnOnce(ActionRegistryBuilder) -> ActionRegistryBuilder,
) -> Harness {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    warden_db::run_migrations(&db).await.unwrap();

    let audit = AuditLogger::new(
        SurrealAuditLogRepository::new(db.clone()),
        config.audit_failure_alert_threshold,
    );
    let (scheduler, worker) = ReconciliationWorker::new(config.reconciliation.clone(), audit.clone());
    worker.spawn();

    let faults = BookingFaults::default();
    let gateway = Arc::new(FakeGateway::default());
    let refund = RefundHandler::new(
        FaultyBookings {
            inner: SurrealBookingRepository::new(db.clone()),
            faults: faults.clone(),
        },
        gateway.clone(),
        scheduler,
        config.gateway_timeout(),
    );
    let builder = ActionRegistry::builder()
        .register(REFUND_ACTION_ID, refund)
        .unwrap();
    let registry = Arc::new(extra(builder).build());

    let delivery = CapturingDelivery::default();
    let service = ChallengeService::new(
        SurrealChallengeRepository::new(db.clone()),
        audit,
        registry,
        Arc::new(delivery.clone()),
        config,
    );

    Harness {
        service,
        bookings: SurrealBookingRepository::new(db.clone()),
        challenges: SurrealChallengeRepository::new(db.clone()),
        audit_log: SurrealAuditLogRepository::new(db.clone()),
        db,
        delivery,
        gateway,
        faults,
    }
}

pub fn issue_input(owner_id: &str, action_id: Option<&str>, metadata: serde_json::Value) -> IssueChallenge {
    IssueChallenge {
        owner_id: owner_id.into(),
        destination: "+15550100".into(),
        action_id: action_id.map(Into::into),
        metadata: Some(metadata),
    }
}

pub fn verify_input(challenge_id: uuid::Uuid, code: &str) -> VerifyChallenge {
    VerifyChallenge {
        challenge_id,
        code: code.into(),
    }
}

/// A six-digit code guaranteed to differ from `code`.
pub fn wrong_code(code: &str) -> String {
    if code == "000000" {
        "000001".into()
    } else {
        "000000".into()
    }
}

pub async fn audit_entries(harness: &Harness, challenge_id: uuid::Uuid) -> Vec<AuditLogEntry> {
    harness
        .audit_log
        .list(
            AuditLogFilter {
                challenge_id: Some(challenge_id),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap()
        .items
}

/// Poll the booking until `done` holds or two seconds pass.
pub async fn wait_for_booking(
    harness: &Harness,
    id: &str,
    done: impl Fn(&Booking) -> bool,
) -> Booking {
    for _ in 0..100 {
        let booking = harness.bookings.get_by_id(id).await.unwrap();
        if done(&booking) {
            return booking;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("booking {id} did not reach the expected state");
}

/// Poll the audit log until at least `count` entries for `event` exist.
pub async fn wait_for_audit(
    harness: &Harness,
    challenge_id: uuid::Uuid,
    event: &str,
    count: usize,
) -> Vec<AuditLogEntry> {
    for _ in 0..100 {
        let entries: Vec<_> = audit_entries(harness, challenge_id)
            .await
            .into_iter()
            .filter(|e| e.event == event)
            .collect();
        if entries.len() >= count {
            return entries;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {count} '{event}' audit entries for {challenge_id}");
}
