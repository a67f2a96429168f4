use std::sync::{Arc, Mutex};

use duckdb::Connection;
use serde::{Deserialize, Serialize};

use crate::{InspectionQueryFilter, InspectionState, InspectionUpdateFilter, StoreError};

/// One row of the inspection ledger. `sequence` is monotonic across
/// inserts so listings preserve submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionRow {
    pub vm_id: String,
    pub status: InspectionState,
    pub error: Option<String>,
    pub sequence: i64,
}

/// Store for `vm_inspection_status`.
pub struct InspectionStore {
    conn: Arc<Mutex<Connection>>,
}

impl InspectionStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert or update a VM's status. New rows draw the next sequence
    /// number; updates keep their original position.
    pub fn upsert(
        &self,
        vm_id: &str,
        status: InspectionState,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r"
            INSERT INTO vm_inspection_status (vm_id, status, error, sequence)
            VALUES (?, ?, ?, nextval('vm_inspection_seq'))
            ON CONFLICT (vm_id) DO UPDATE SET
                status = excluded.status,
                error = excluded.error
            ",
            duckdb::params![vm_id, status.as_str(), error],
        )?;
        Ok(())
    }

    /// Fetch one VM's row, if present.
    pub fn get(&self, vm_id: &str) -> Result<Option<InspectionRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            "SELECT vm_id, status, error, sequence FROM vm_inspection_status WHERE vm_id = ?",
            duckdb::params![vm_id],
            row_to_inspection,
        ) {
            Ok(row) => Ok(Some(row)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// List rows matching the filter.
    pub fn list(&self, filter: &InspectionQueryFilter) -> Result<Vec<InspectionRow>, StoreError> {
        let (sql, args) =
            filter.apply("SELECT vm_id, status, error, sequence FROM vm_inspection_status");
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(duckdb::params_from_iter(args.iter()), row_to_inspection)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Set the status of every row matching the filter. Returns the
    /// number of rows changed.
    pub fn update_status(
        &self,
        filter: &InspectionUpdateFilter,
        status: InspectionState,
    ) -> Result<usize, StoreError> {
        let (sql, where_args) = filter.apply("UPDATE vm_inspection_status SET status = ?");
        let mut args = vec![status.as_str().to_string()];
        args.extend(where_args);

        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(&sql, duckdb::params_from_iter(args.iter()))?;
        Ok(affected)
    }

    /// Drop all rows; a new inspection run starts from a clean ledger.
    pub fn clear(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM vm_inspection_status", [])?;
        Ok(())
    }
}

fn row_to_inspection(row: &duckdb::Row<'_>) -> Result<InspectionRow, duckdb::Error> {
    let status: String = row.get(1)?;
    Ok(InspectionRow {
        vm_id: row.get(0)?,
        status: status.parse().unwrap_or(InspectionState::Error),
        error: row.get(2)?,
        sequence: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[test]
    fn upsert_assigns_monotonic_sequence() {
        let store = Store::open_memory().unwrap();
        let inspections = store.inspections();
        for vm in ["vm-a", "vm-b", "vm-c"] {
            inspections.upsert(vm, InspectionState::Pending, None).unwrap();
        }

        let rows = inspections
            .list(&InspectionQueryFilter::new().order_by_sequence())
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.vm_id.as_str()).collect();
        assert_eq!(ids, vec!["vm-a", "vm-b", "vm-c"]);
        assert!(rows[0].sequence < rows[1].sequence);
        assert!(rows[1].sequence < rows[2].sequence);
    }

    #[test]
    fn update_keeps_sequence() {
        let store = Store::open_memory().unwrap();
        let inspections = store.inspections();
        inspections.upsert("vm-a", InspectionState::Pending, None).unwrap();
        inspections.upsert("vm-b", InspectionState::Pending, None).unwrap();
        inspections
            .upsert("vm-a", InspectionState::Completed, None)
            .unwrap();

        let rows = inspections
            .list(&InspectionQueryFilter::new().order_by_sequence())
            .unwrap();
        assert_eq!(rows[0].vm_id, "vm-a");
        assert_eq!(rows[0].status, InspectionState::Completed);
    }

    #[test]
    fn get_missing_is_none() {
        let store = Store::open_memory().unwrap();
        assert!(store.inspections().get("nope").unwrap().is_none());
    }

    #[test]
    fn error_text_round_trips() {
        let store = Store::open_memory().unwrap();
        store
            .inspections()
            .upsert("vm-a", InspectionState::Error, Some("snapshot failed"))
            .unwrap();
        let row = store.inspections().get("vm-a").unwrap().unwrap();
        assert_eq!(row.error.as_deref(), Some("snapshot failed"));
    }

    #[test]
    fn cancel_pending_rows_only() {
        let store = Store::open_memory().unwrap();
        let inspections = store.inspections();
        inspections.upsert("vm-a", InspectionState::Completed, None).unwrap();
        inspections.upsert("vm-b", InspectionState::Pending, None).unwrap();
        inspections.upsert("vm-c", InspectionState::Pending, None).unwrap();

        let changed = inspections
            .update_status(
                &InspectionUpdateFilter::new().by_state(&[InspectionState::Pending]),
                InspectionState::Canceled,
            )
            .unwrap();
        assert_eq!(changed, 2);

        let row = inspections.get("vm-a").unwrap().unwrap();
        assert_eq!(row.status, InspectionState::Completed);
        let row = inspections.get("vm-b").unwrap().unwrap();
        assert_eq!(row.status, InspectionState::Canceled);
    }

    #[test]
    fn clear_empties_ledger() {
        let store = Store::open_memory().unwrap();
        store
            .inspections()
            .upsert("vm-a", InspectionState::Pending, None)
            .unwrap();
        store.inspections().clear().unwrap();
        assert!(store
            .inspections()
            .list(&InspectionQueryFilter::new())
            .unwrap()
            .is_empty());
    }
}
