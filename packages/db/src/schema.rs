//! Database schema definitions using SurrealQL.
//!
//! Tables are schemaless: the resume-state and progress blobs are opaque
//! objects with arbitrary keys. Uniqueness lives in the indexes.

use crate::{Db, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes.
pub async fn init_schema(db: &Db) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.conn()
        .query(JOB_SCHEMA)
        .query(AREA_SCHEMA)
        .query(CREDENTIAL_SCHEMA)
        .query(INCIDENT_SCHEMA)
        .await?
        .check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// `dedup_key` is `provider|scope|branch|command` for scoped jobs and
/// `scope_discovery|provider|account` for discovery jobs.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE INDEX IF NOT EXISTS job_dedup ON job FIELDS dedup_key UNIQUE;
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_provider ON job FIELDS owner.provider;
DEFINE INDEX IF NOT EXISTS job_credential ON job FIELDS owner.credential_id;
DEFINE INDEX IF NOT EXISTS job_origin ON job FIELDS origin_job_id;
DEFINE INDEX IF NOT EXISTS job_created ON job FIELDS created_at;
"#;

/// Area table schema: keyed by `<type>_<natural id>`, path unique.
const AREA_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS area SCHEMALESS;

DEFINE INDEX IF NOT EXISTS area_path ON area FIELDS path UNIQUE;
DEFINE INDEX IF NOT EXISTS area_type ON area FIELDS area_type;
"#;

const CREDENTIAL_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS credential SCHEMALESS;

DEFINE INDEX IF NOT EXISTS credential_account ON credential FIELDS provider, account UNIQUE;
"#;

/// Append-only audit log of sync mismatches.
const INCIDENT_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS incident SCHEMALESS;

DEFINE INDEX IF NOT EXISTS incident_created ON incident FIELDS created_at;
"#;
