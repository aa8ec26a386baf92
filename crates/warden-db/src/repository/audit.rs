//! SurrealDB implementation of [`AuditLogRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;
use warden_core::error::WardenResult;
use warden_core::models::audit::{AuditLogEntry, AuditOutcome, CreateAuditLogEntry};
use warden_core::repository::{AuditLogFilter, AuditLogRepository, PaginatedResult, Pagination};

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct AuditRow {
    challenge_id: String,
    owner_id: String,
    action_id: Option<String>,
    event: String,
    outcome: String,
    detail: Option<String>,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct AuditRowWithId {
    record_id: String,
    challenge_id: String,
    owner_id: String,
    action_id: Option<String>,
    event: String,
    outcome: String,
    detail: Option<String>,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn parse_outcome(s: &str) -> Result<AuditOutcome, DbError> {
    match s {
        "Succeeded" => Ok(AuditOutcome::Succeeded),
        "Rejected" => Ok(AuditOutcome::Rejected),
        "Failed" => Ok(AuditOutcome::Failed),
        "Denied" => Ok(AuditOutcome::Denied),
        other => Err(DbError::Decode(format!("unknown audit outcome: {other}"))),
    }
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(s).map_err(|e| DbError::Decode(format!("invalid {what} UUID: {e}")))
}

impl AuditRow {
    fn into_entry(self, id: Uuid) -> Result<AuditLogEntry, DbError> {
        Ok(AuditLogEntry {
            id,
            challenge_id: parse_uuid(&self.challenge_id, "challenge")?,
            owner_id: self.owner_id,
            action_id: self.action_id,
            event: self.event,
            outcome: parse_outcome(&self.outcome)?,
            detail: self.detail,
            metadata: self.metadata,
            timestamp: self.timestamp,
        })
    }
}

impl AuditRowWithId {
    fn try_into_entry(self) -> Result<AuditLogEntry, DbError> {
        Ok(AuditLogEntry {
            id: parse_uuid(&self.record_id, "audit")?,
            challenge_id: parse_uuid(&self.challenge_id, "challenge")?,
            owner_id: self.owner_id,
            action_id: self.action_id,
            event: self.event,
            outcome: parse_outcome(&self.outcome)?,
            detail: self.detail,
            metadata: self.metadata,
            timestamp: self.timestamp,
        })
    }
}

/// Build the WHERE clause for a filter. Every filter field is bound
/// under its own name; unset fields are bound as `NONE` and left out of
/// the clause.
fn filter_clause(filter: &AuditLogFilter) -> String {
    let mut conds = Vec::new();
    if filter.challenge_id.is_some() {
        conds.push("challenge_id = $challenge_id");
    }
    if filter.owner_id.is_some() {
        conds.push("owner_id = $owner_id");
    }
    if filter.event.is_some() {
        conds.push("event = $event");
    }
    if filter.from.is_some() {
        conds.push("timestamp >= $from");
    }
    if filter.to.is_some() {
        conds.push("timestamp < $to");
    }
    if conds.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conds.join(" AND "))
    }
}

/// SurrealDB implementation of the append-only audit log.
#[derive(Clone)]
pub struct SurrealAuditLogRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuditLogRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> AuditLogRepository for SurrealAuditLogRepository<C> {
    async fn append(&self, input: CreateAuditLogEntry) -> WardenResult<AuditLogEntry> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('audit_log', $id) SET \
                 challenge_id = $challenge_id, \
                 owner_id = $owner_id, \
                 action_id = $action_id, \
                 event = $event, \
                 outcome = $outcome, \
                 detail = $detail, \
                 metadata = $metadata",
            )
            .bind(("id", id_str.clone()))
            .bind(("challenge_id", input.challenge_id.to_string()))
            .bind(("owner_id", input.owner_id))
            .bind(("action_id", input.action_id))
            .bind(("event", input.event))
            .bind(("outcome", input.outcome.as_str().to_string()))
            .bind(("detail", input.detail))
            .bind(("metadata", input.metadata))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<AuditRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "audit_log".into(),
            id: id_str,
        })?;

        Ok(row.into_entry(id)?)
    }

    async fn list(
        &self,
        filter: AuditLogFilter,
        pagination: Pagination,
    ) -> WardenResult<PaginatedResult<AuditLogEntry>> {
        let clause = filter_clause(&filter);

        let count_query = format!("SELECT count() AS total FROM audit_log {clause} GROUP ALL");
        let mut count_result = self
            .db
            .query(&count_query)
            .bind(("challenge_id", filter.challenge_id.map(|id| id.to_string())))
            .bind(("owner_id", filter.owner_id.clone()))
            .bind(("event", filter.event.clone()))
            .bind(("from", filter.from))
            .bind(("to", filter.to))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let list_query = format!(
            "SELECT meta::id(id) AS record_id, * FROM audit_log {clause} \
             ORDER BY timestamp ASC \
             LIMIT $limit START $offset"
        );
        let mut result = self
            .db
            .query(&list_query)
            .bind(("challenge_id", filter.challenge_id.map(|id| id.to_string())))
            .bind(("owner_id", filter.owner_id))
            .bind(("event", filter.event))
            .bind(("from", filter.from))
            .bind(("to", filter.to))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AuditRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_entry())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> WardenResult<u64> {
        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM audit_log \
                 WHERE timestamp < $cutoff GROUP ALL",
            )
            .bind(("cutoff", cutoff))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        self.db
            .query("DELETE audit_log WHERE timestamp < $cutoff")
            .bind(("cutoff", cutoff))
            .await
            .map_err(DbError::from)?;

        Ok(total)
    }
}
