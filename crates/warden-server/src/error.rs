//! Startup errors.

use thiserror::Error;
use warden_db::DbError;
use warden_gate::delivery::DeliveryError;
use warden_gate::gateway::GatewayError;
use warden_gate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("delivery provider: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("payment gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("action registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("signal handler: {0}")]
    Signal(#[from] std::io::Error),
}
