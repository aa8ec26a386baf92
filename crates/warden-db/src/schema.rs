//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Enums are stored as strings with
//! ASSERT constraints for validation.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1 — initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Challenges (one-time codes bound to an optional action)
-- =======================================================================
DEFINE TABLE challenge SCHEMAFULL;
DEFINE FIELD owner_id ON TABLE challenge TYPE string;
DEFINE FIELD code_hash ON TABLE challenge TYPE string;
DEFINE FIELD action_id ON TABLE challenge TYPE option<string>;
DEFINE FIELD metadata ON TABLE challenge TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD expires_at ON TABLE challenge TYPE datetime;
DEFINE FIELD consumed ON TABLE challenge TYPE bool DEFAULT false;
DEFINE FIELD consumed_at ON TABLE challenge TYPE option<datetime>;
DEFINE FIELD retry_count ON TABLE challenge TYPE int DEFAULT 0 \
    ASSERT $value >= 0;
DEFINE FIELD max_retries ON TABLE challenge TYPE int \
    ASSERT $value >= 0;
DEFINE FIELD created_at ON TABLE challenge TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_challenge_owner_created ON TABLE challenge \
    COLUMNS owner_id, created_at;

-- =======================================================================
-- Audit Log (append-only)
-- =======================================================================
DEFINE TABLE audit_log SCHEMAFULL
    PERMISSIONS
        FOR create FULL
        FOR select FULL
        FOR update NONE
        FOR delete NONE;
DEFINE FIELD challenge_id ON TABLE audit_log TYPE string;
DEFINE FIELD owner_id ON TABLE audit_log TYPE string;
DEFINE FIELD action_id ON TABLE audit_log TYPE option<string>;
DEFINE FIELD event ON TABLE audit_log TYPE string;
DEFINE FIELD outcome ON TABLE audit_log TYPE string \
    ASSERT $value IN ['Succeeded', 'Rejected', 'Failed', 'Denied'];
DEFINE FIELD detail ON TABLE audit_log TYPE option<string>;
DEFINE FIELD metadata ON TABLE audit_log TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD timestamp ON TABLE audit_log TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_audit_time ON TABLE audit_log \
    COLUMNS timestamp;
DEFINE INDEX idx_audit_challenge ON TABLE audit_log \
    COLUMNS challenge_id;
DEFINE INDEX idx_audit_owner ON TABLE audit_log \
    COLUMNS owner_id;

-- =======================================================================
-- Bookings (internal record reconciled by the refund action)
-- =======================================================================
DEFINE TABLE booking SCHEMAFULL;
DEFINE FIELD payment_id ON TABLE booking TYPE string;
DEFINE FIELD amount ON TABLE booking TYPE int ASSERT $value >= 0;
DEFINE FIELD currency ON TABLE booking TYPE string;
DEFINE FIELD status ON TABLE booking TYPE string \
    ASSERT $value IN ['Confirmed', 'Completed', 'Cancelled'];
DEFINE FIELD refund_status ON TABLE booking TYPE string \
    DEFAULT 'None' \
    ASSERT $value IN ['None', 'InProgress', 'Refunded'];
DEFINE FIELD refund_reference ON TABLE booking TYPE option<string>;
DEFINE FIELD gateway_status ON TABLE booking TYPE option<string>;
DEFINE FIELD refund_amount ON TABLE booking TYPE option<int>;
DEFINE FIELD refund_requested_at ON TABLE booking \
    TYPE option<datetime>;
DEFINE FIELD refunded_at ON TABLE booking TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE booking TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE booking TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_booking_payment ON TABLE booking \
    COLUMNS payment_id;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            db.query(migration.sql).await?.check().map_err(|e| {
                DbError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e,
                ))
            })?;

            db.query(
                "CREATE _migration SET version = $version, \
                 name = $name",
            )
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;

            info!(
                version = migration.version,
                "Migration applied successfully"
            );
        }
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
