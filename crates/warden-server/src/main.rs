//! Warden Server — application entry point.
//!
//! Connects to SurrealDB, applies migrations, wires the challenge
//! service with its action registry, delivery provider and
//! reconciliation worker, and runs the retention sweep until shutdown.

mod config;
mod error;
mod retention;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use warden_db::repository::{
    SurrealAuditLogRepository, SurrealBookingRepository, SurrealChallengeRepository,
};
use warden_gate::actions::{REFUND_ACTION_ID, RefundHandler};
use warden_gate::delivery::build_delivery_provider;
use warden_gate::gateway::HttpPaymentGateway;
use warden_gate::reconcile::ReconciliationWorker;
use warden_gate::{ActionRegistry, AuditLogger, ChallengeService};

use crate::config::ServerConfig;
use crate::error::ServerError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .json()
        .init();

    info!("Starting Warden server...");

    if let Err(e) = run().await {
        error!(error = %e, "Warden server failed");
        std::process::exit(1);
    }

    info!("Warden server stopped.");
}

async fn run() -> Result<(), ServerError> {
    let config = ServerConfig::load()?;

    let db = warden_db::connect(&config.db).await?;

    let audit = AuditLogger::new(
        SurrealAuditLogRepository::new(db.clone()),
        config.gate.audit_failure_alert_threshold,
    );
    let (scheduler, worker) =
        ReconciliationWorker::new(config.gate.reconciliation.clone(), audit.clone());
    let worker = worker.spawn();

    let mut registry = ActionRegistry::builder();
    match &config.gateway {
        Some(gateway_config) => {
            let gateway =
                HttpPaymentGateway::new(gateway_config.clone(), config.gate.gateway_timeout())?;
            registry = registry.register(
                REFUND_ACTION_ID,
                RefundHandler::new(
                    SurrealBookingRepository::new(db.clone()),
                    Arc::new(gateway),
                    scheduler,
                    config.gate.gateway_timeout(),
                ),
            )?;
        }
        None => {
            warn!("No payment gateway configured, {REFUND_ACTION_ID} action disabled");
            drop(scheduler);
        }
    }
    let registry = Arc::new(registry.build());
    info!(actions = ?registry.action_ids(), "Action registry ready");

    let delivery = build_delivery_provider(&config.delivery, config.gate.delivery_timeout())?;
    info!(provider = delivery.name(), "Delivery provider ready");

    let service = ChallengeService::new(
        SurrealChallengeRepository::new(db.clone()),
        audit,
        registry,
        delivery,
        config.gate.clone(),
    );
    info!(
        lifetime_secs = service.config().challenge_lifetime_secs,
        max_retries = service.config().max_retries,
        "Challenge service ready"
    );

    let sweeper = retention::spawn(
        SurrealChallengeRepository::new(db.clone()),
        SurrealAuditLogRepository::new(db.clone()),
        config.retention.clone(),
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    sweeper.abort();
    // Dropping the service releases the last retry scheduler, which lets
    // the worker finish in-flight reconciliations and exit.
    drop(service);
    if let Err(e) = worker.await {
        warn!(error = %e, "Reconciliation worker did not shut down cleanly");
    }

    Ok(())
}
