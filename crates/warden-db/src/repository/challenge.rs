//! SurrealDB implementation of [`ChallengeRepository`].
//!
//! Consumption and retry accounting are single `UPDATE ... WHERE`
//! statements, so concurrent verifications of the same challenge are
//! serialized by the storage engine rather than by a read-then-write
//! pair in the caller. The consume condition re-checks the retry budget
//! and expiry at write time; a stale read in the caller cannot consume
//! a locked or expired challenge.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{debug, warn};
use uuid::Uuid;
use warden_core::error::WardenResult;
use warden_core::models::challenge::{Challenge, CreateChallenge};
use warden_core::repository::ChallengeRepository;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct ChallengeRow {
    owner_id: String,
    code_hash: String,
    action_id: Option<String>,
    metadata: serde_json::Value,
    expires_at: DateTime<Utc>,
    consumed: bool,
    consumed_at: Option<DateTime<Utc>>,
    retry_count: u32,
    max_retries: u32,
    created_at: DateTime<Utc>,
}

impl ChallengeRow {
    fn into_challenge(self, id: Uuid) -> Challenge {
        Challenge {
            id,
            owner_id: self.owner_id,
            code_hash: self.code_hash,
            action_id: self.action_id,
            metadata: self.metadata,
            expires_at: self.expires_at,
            consumed: self.consumed,
            consumed_at: self.consumed_at,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn not_found(id: &str) -> DbError {
    DbError::NotFound {
        entity: "challenge".into(),
        id: id.to_string(),
    }
}

/// SurrealDB implementation of the Challenge repository.
#[derive(Clone)]
pub struct SurrealChallengeRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealChallengeRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn fetch(&self, id: Uuid) -> Result<Challenge, DbError> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('challenge', $id)")
            .bind(("id", id_str.clone()))
            .await?;

        let rows: Vec<ChallengeRow> = result.take(0)?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(&id_str))?;

        Ok(row.into_challenge(id))
    }

    async fn consume_once(&self, id: Uuid) -> Result<bool, DbError> {
        let result = self
            .db
            .query(
                "UPDATE type::record('challenge', $id) SET \
                 consumed = true, \
                 consumed_at = time::now() \
                 WHERE consumed = false \
                 AND retry_count < max_retries \
                 AND expires_at > time::now()",
            )
            .bind(("id", id.to_string()))
            .await?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<ChallengeRow> = result.take(0)?;
        Ok(!rows.is_empty())
    }
}

impl<C: Connection> ChallengeRepository for SurrealChallengeRepository<C> {
    async fn create(&self, input: CreateChallenge) -> WardenResult<Challenge> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('challenge', $id) SET \
                 owner_id = $owner_id, \
                 code_hash = $code_hash, \
                 action_id = $action_id, \
                 metadata = $metadata, \
                 expires_at = $expires_at, \
                 consumed = false, \
                 retry_count = 0, \
                 max_retries = $max_retries",
            )
            .bind(("id", id_str.clone()))
            .bind(("owner_id", input.owner_id))
            .bind(("code_hash", input.code_hash))
            .bind(("action_id", input.action_id))
            .bind(("metadata", input.metadata))
            .bind(("expires_at", input.expires_at))
            .bind(("max_retries", input.max_retries))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<ChallengeRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(&id_str))?;

        debug!(challenge_id = %id, "Challenge persisted");
        Ok(row.into_challenge(id))
    }

    async fn get_by_id(&self, id: Uuid) -> WardenResult<Challenge> {
        Ok(self.fetch(id).await?)
    }

    async fn try_consume(&self, id: Uuid) -> WardenResult<bool> {
        match self.consume_once(id).await {
            Ok(won) => Ok(won),
            // A write conflict with a concurrent writer aborts this
            // transaction. If the record can no longer be consumed, the
            // other writer won the race.
            Err(err) => {
                warn!(challenge_id = %id, error = %err, "Consume update failed, re-reading");
                let current = self.fetch(id).await?;
                if current.consumed
                    || current.retries_exhausted()
                    || current.is_expired_at(Utc::now())
                {
                    Ok(false)
                } else {
                    Err(err.into())
                }
            }
        }
    }

    async fn record_failed_attempt(&self, id: Uuid) -> WardenResult<Challenge> {
        let result = self
            .db
            .query(
                "UPDATE type::record('challenge', $id) SET \
                 retry_count += 1 \
                 WHERE consumed = false AND retry_count < max_retries",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<ChallengeRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(row.into_challenge(id)),
            None => Ok(self.fetch(id).await?),
        }
    }

    async fn count_created_since(&self, owner_id: &str, since: DateTime<Utc>) -> WardenResult<u64> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM challenge \
                 WHERE owner_id = $owner_id AND created_at >= $since \
                 GROUP ALL",
            )
            .bind(("owner_id", owner_id.to_string()))
            .bind(("since", since))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> WardenResult<u64> {
        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM challenge \
                 WHERE created_at < $cutoff GROUP ALL",
            )
            .bind(("cutoff", cutoff))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        self.db
            .query("DELETE challenge WHERE created_at < $cutoff")
            .bind(("cutoff", cutoff))
            .await
            .map_err(DbError::from)?;

        Ok(total)
    }
}
