//! Opening the shared SurrealDB handle.
//!
//! [`connect`] retries the whole open/sign-in/select sequence a bounded
//! number of times, so the server can start before the database is
//! reachable, then applies pending migrations before handing the handle
//! to the repositories.

use std::time::Duration;

use serde::Deserialize;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::{info, warn};

use crate::error::DbError;
use crate::schema::run_migrations;

/// `[db]` section of the server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// WebSocket endpoint, `host:port`.
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Connection attempts before startup gives up. Zero counts as one.
    pub connect_attempts: u32,
    pub connect_retry_delay_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "warden".into(),
            database: "main".into(),
            username: "root".into(),
            password: "root".into(),
            connect_attempts: 5,
            connect_retry_delay_ms: 2_000,
        }
    }
}

impl DbConfig {
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

/// Connect, authenticate and migrate.
pub async fn connect(config: &DbConfig) -> Result<Surreal<Client>, DbError> {
    let attempts = config.connect_attempts.max(1);
    let mut attempt = 1;

    let db = loop {
        match open(config).await {
            Ok(db) => break db,
            Err(e) if attempt < attempts => {
                warn!(
                    url = %config.url,
                    attempt,
                    attempts,
                    error = %e,
                    "SurrealDB not reachable, retrying"
                );
                tokio::time::sleep(config.connect_retry_delay()).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    };

    run_migrations(&db).await?;
    info!(
        url = %config.url,
        namespace = %config.namespace,
        database = %config.database,
        attempt,
        "Connected to SurrealDB"
    );
    Ok(db)
}

async fn open(config: &DbConfig) -> Result<Surreal<Client>, surrealdb::Error> {
    let db = Surreal::new::<Ws>(&config.url).await?;
    db.signin(Root {
        username: config.username.clone(),
        password: config.password.clone(),
    })
    .await?;
    db.use_ns(&config.namespace).use_db(&config.database).await?;
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_section_keeps_defaults() {
        let config: DbConfig = serde_json::from_value(serde_json::json!({
            "url": "db.internal:8000",
            "connect_attempts": 10
        }))
        .unwrap();

        assert_eq!(config.url, "db.internal:8000");
        assert_eq!(config.connect_attempts, 10);
        assert_eq!(config.namespace, "warden");
        assert_eq!(config.connect_retry_delay(), Duration::from_secs(2));
    }
}
