//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates the tables backing each store primitive and their indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(COUNTER_SCHEMA).await?.check()?;
    db.query(HASH_SCHEMA).await?.check()?;
    db.query(ZSET_SCHEMA).await?.check()?;
    db.query(LIST_SCHEMA).await?.check()?;
    db.query(SET_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Counters, one record per key.
const COUNTER_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS kv SCHEMALESS;
"#;

/// Hashes, one record per key holding a flat object of string fields.
const HASH_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS hash SCHEMALESS;
"#;

/// Sorted sets, one record per (key, member).
const ZSET_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS zset SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS key ON zset TYPE string;
DEFINE FIELD IF NOT EXISTS member ON zset TYPE string;
DEFINE FIELD IF NOT EXISTS score ON zset TYPE int;

-- Range scans walk one key in score order
DEFINE INDEX IF NOT EXISTS zset_key_score ON zset FIELDS key, score;
"#;

/// Lists, one record per element ordered by a per-key sequence.
const LIST_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS list SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS key ON list TYPE string;
DEFINE FIELD IF NOT EXISTS seq ON list TYPE int;
DEFINE FIELD IF NOT EXISTS value ON list TYPE string;

DEFINE INDEX IF NOT EXISTS list_key_seq ON list FIELDS key, seq;
"#;

/// Sets, one record per (key, member).
const SET_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS set_member SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS key ON set_member TYPE string;
DEFINE FIELD IF NOT EXISTS member ON set_member TYPE string;

DEFINE INDEX IF NOT EXISTS set_member_key ON set_member FIELDS key;
"#;
