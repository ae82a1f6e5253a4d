//! Versioned schema for the research store.
//!
//! Applied versions are recorded in `_migrations`. Each pending step runs
//! in its own transaction together with its bookkeeping row.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_research_jobs",
        sql: include_str!("migrations/sql/001_create_research_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_research_events",
        sql: include_str!("migrations/sql/002_create_research_events.sql"),
    },
];

/// Highest schema version this build knows.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Highest applied schema version, `0` for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |r| r.get(0))?;
    Ok(version)
}

/// Brings the schema up to [`latest_version`].
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;

    let applied = current_version(conn)?;
    if applied > latest_version() {
        return Err(DatabaseError::SchemaTooNew {
            found: applied,
            supported: latest_version(),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        description: migration.description,
        reason: e.to_string(),
    };

    log::info!("Applying schema v{} ({})", migration.version, migration.description);
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        params![migration.version, migration.description],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)
}
