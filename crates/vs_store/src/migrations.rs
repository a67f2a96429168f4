//! Database migrations

use duckdb::Connection;
use tracing::info;

use crate::StoreError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: include_str!("migrations/001_initial_schema.sql"),
    },
    Migration {
        version: 2,
        name: "vm_inventory",
        sql: include_str!("migrations/002_vm_inventory.sql"),
    },
];

/// Run all pending migrations
pub(crate) fn run_all(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT current_timestamp
        );
    ",
    )?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if i64::from(migration.version) > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "applying migration"
            );

            conn.execute_batch(migration.sql).map_err(|e| {
                StoreError::Migration(format!(
                    "failed to apply migration {}: {e}",
                    migration.name
                ))
            })?;

            conn.execute(
                "INSERT INTO _migrations (version, name) VALUES (?, ?)",
                duckdb::params![migration.version, migration.name],
            )?;
        }
    }

    Ok(())
}
