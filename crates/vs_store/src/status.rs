use std::sync::{Arc, Mutex};

use duckdb::Connection;

use crate::{now_rfc3339, AgentMode, CollectorState, StoreError};

/// Persisted collector status row; read at boot to recover a completed
/// collection without re-running it.
pub struct CollectorStatusStore {
    conn: Arc<Mutex<Connection>>,
}

impl CollectorStatusStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Load the persisted state, if any.
    pub fn get(&self) -> Result<Option<(CollectorState, Option<String>)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            "SELECT status, error FROM collector_status WHERE id = 1",
            [],
            |row| {
                let status: String = row.get(0)?;
                let error: Option<String> = row.get(1)?;
                Ok((status, error))
            },
        ) {
            Ok((status, error)) => {
                let state = status.parse().unwrap_or(CollectorState::Ready);
                Ok(Some((state, error)))
            }
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Persist the current state.
    pub fn set(&self, state: CollectorState, error: Option<&str>) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r"
            INSERT INTO collector_status (id, status, error, updated_at)
            VALUES (1, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                error = excluded.error,
                updated_at = excluded.updated_at
            ",
            duckdb::params![state.as_str(), error, now_rfc3339()],
        )?;
        Ok(())
    }
}

/// Persisted agent settings (currently just the operating mode).
pub struct AgentStore {
    conn: Arc<Mutex<Connection>>,
}

impl AgentStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Load the persisted mode, if one was ever set.
    pub fn mode(&self) -> Result<Option<AgentMode>, StoreError> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row("SELECT mode FROM agent_status WHERE id = 1", [], |row| {
            row.get::<_, String>(0)
        }) {
            Ok(mode) => Ok(mode.parse().ok()),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Persist the operating mode.
    pub fn set_mode(&self, mode: AgentMode) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r"
            INSERT INTO agent_status (id, mode, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                mode = excluded.mode,
                updated_at = excluded.updated_at
            ",
            duckdb::params![mode.as_str(), now_rfc3339()],
        )?;
        Ok(())
    }
}
