//! Embedded schema migrations.
//!
//! SQL files are compiled in with `include_str!` and applied in order on
//! startup. Applied names are recorded in `_popline_migrations`; each
//! migration and its tracking row commit in one transaction.

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_facilities",
        sql: include_str!("migrations/001_facilities.sql"),
    },
    Migration {
        name: "002_sections",
        sql: include_str!("migrations/002_sections.sql"),
    },
    Migration {
        name: "003_reservations",
        sql: include_str!("migrations/003_reservations.sql"),
    },
    Migration {
        name: "004_inquiries",
        sql: include_str!("migrations/004_inquiries.sql"),
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to read migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Applies every pending migration. Returns how many were applied.
///
/// Migrations already recorded in `_popline_migrations` are skipped.
///
/// # Errors
///
/// Returns `MigrationError` if a migration fails to execute (its changes are
/// rolled back) or if the tracking table cannot be queried.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn apply(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _popline_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|source| MigrationError::ExecutionFailed {
        name: "bootstrap".to_string(),
        source,
    })?;

    let mut applied = 0;
    for migration in migrations {
        let done: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _popline_migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;
        if done {
            tracing::debug!(migration = migration.name, "already applied");
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");
        apply_one(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
        applied += 1;
    }

    Ok(applied)
}

fn apply_one(conn: &Connection, migration: &Migration) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _popline_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}
