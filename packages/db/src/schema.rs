//! Database schema definitions using SurrealQL.

use crate::{get_db, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    // Job table
    db.query(JOB_SCHEMA).await?.check()?;

    // Queue-wide configuration
    db.query(CONFIG_SCHEMA).await?.check()?;

    // Worker registry
    db.query(WORKER_SCHEMA).await?.check()?;

    // Id sequences
    db.query(SEQUENCE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// Timestamps are epoch milliseconds so eligibility checks are plain integer
/// comparisons. The record key is the numeric job id.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS seq ON job TYPE int;
DEFINE FIELD IF NOT EXISTS command ON job TYPE string;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string
    ASSERT $value IN ["pending", "processing", "completed", "failed", "dead"];
DEFINE FIELD IF NOT EXISTS attempts ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS max_retries ON job TYPE int;
DEFINE FIELD IF NOT EXISTS backoff_base_seconds ON job TYPE number;
DEFINE FIELD IF NOT EXISTS max_backoff_seconds ON job TYPE int;
DEFINE FIELD IF NOT EXISTS next_eligible_at ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS worker_id ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS claimed_at ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS last_error ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS exit_code ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS output ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE int;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE int;

DEFINE INDEX IF NOT EXISTS job_state ON job FIELDS state;
-- Claim polling scans pending jobs in id order
DEFINE INDEX IF NOT EXISTS job_state_seq ON job FIELDS state, seq;
"#;

/// Single-record configuration table (`config:global`).
const CONFIG_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS config SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS max_retries ON config TYPE int;
DEFINE FIELD IF NOT EXISTS backoff_base_seconds ON config TYPE number;
DEFINE FIELD IF NOT EXISTS log_level ON config TYPE string;
DEFINE FIELD IF NOT EXISTS max_backoff_seconds ON config TYPE int;
DEFINE FIELD IF NOT EXISTS poll_interval_ms ON config TYPE int;
DEFINE FIELD IF NOT EXISTS job_timeout_seconds ON config TYPE int;
DEFINE FIELD IF NOT EXISTS lease_seconds ON config TYPE int;
"#;

/// Worker registry schema, keyed by worker id.
const WORKER_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS worker SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS worker_id ON worker TYPE string;
DEFINE FIELD IF NOT EXISTS pid ON worker TYPE int;
DEFINE FIELD IF NOT EXISTS started_at ON worker TYPE int;
DEFINE FIELD IF NOT EXISTS heartbeat_at ON worker TYPE int;
DEFINE FIELD IF NOT EXISTS current_job ON worker TYPE option<int>;
DEFINE FIELD IF NOT EXISTS stop_requested ON worker TYPE bool DEFAULT false;

DEFINE INDEX IF NOT EXISTS worker_heartbeat ON worker FIELDS heartbeat_at;
"#;

/// Monotonic counters, one record per sequence.
const SEQUENCE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS sequence SCHEMALESS;
"#;
