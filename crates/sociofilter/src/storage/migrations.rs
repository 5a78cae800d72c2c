//! Database migration system for sociofilter.
//!
//! Migrations are listed in [`MIGRATIONS`] in version order. Each one runs
//! inside its own transaction together with the version bump, so a crash
//! never leaves a half-applied schema behind.

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};

use super::schema::{CREATE_METADATA_TABLE, SCHEMA_STATEMENTS};

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// A single schema migration.
#[derive(Debug)]
pub struct Migration {
    /// Version the schema is at after this migration.
    pub version: i32,
    /// What the migration does.
    pub description: &'static str,
    /// Statements to execute.
    pub statements: &'static [&'static str],
}

/// All migrations, oldest first.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "key-value records",
    statements: SCHEMA_STATEMENTS,
}];

/// The schema version after all migrations have run.
#[must_use]
pub fn current_version() -> i32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Bring the database schema up to the current version.
///
/// # Errors
///
/// Returns an error if the stored version is unreadable or a migration fails.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    conn.execute(CREATE_METADATA_TABLE, [])?;

    let from = get_schema_version(conn)?;
    if from > current_version() {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {from} is newer than supported version {}",
                current_version()
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        apply(conn, migration)?;
    }

    Ok(())
}

/// Run one migration and record its version atomically.
fn apply(conn: &mut Connection, migration: &Migration) -> Result<()> {
    debug!(
        version = migration.version,
        description = migration.description,
        "Applying migration"
    );
    let tx = conn.transaction()?;
    for statement in migration.statements {
        tx.execute(statement, [])?;
    }
    set_schema_version(&tx, migration.version)?;
    tx.commit()?;
    Ok(())
}

/// Get the schema version recorded in the database, 0 for a fresh database.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
    }
}

/// Record the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}
