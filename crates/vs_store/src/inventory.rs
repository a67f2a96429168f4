use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use duckdb::Connection;
use serde::{Deserialize, Serialize};

use crate::{now_rfc3339, parse_rfc3339, StoreError};

/// One collected inventory snapshot. The payload is an opaque JSON blob
/// written by the collector; the HTTP layer unmarshals it for clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Single-row inventory store; each collection run replaces the blob.
pub struct InventoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl InventoryStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Load the latest inventory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing has been collected.
    pub fn get(&self) -> Result<Inventory, StoreError> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            "SELECT data, created_at FROM inventory WHERE id = 1",
            [],
            |row| {
                let data: Vec<u8> = row.get(0)?;
                let created_at: String = row.get(1)?;
                Ok((data, created_at))
            },
        ) {
            Ok((data, created_at)) => Ok(Inventory {
                data,
                created_at: parse_rfc3339(&created_at),
            }),
            Err(duckdb::Error::QueryReturnedNoRows) => Err(StoreError::NotFound("inventory")),
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the stored inventory blob.
    pub fn set(&self, data: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r"
            INSERT INTO inventory (id, data, created_at)
            VALUES (1, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                data = excluded.data,
                created_at = excluded.created_at
            ",
            duckdb::params![data, now_rfc3339()],
        )?;
        Ok(())
    }
}
