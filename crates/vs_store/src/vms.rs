use std::sync::{Arc, Mutex};

use duckdb::Connection;
use serde::{Deserialize, Serialize};

use crate::StoreError;
use vs_filter::{compile, FilterError};

/// Flattened VM row extracted from the inventory blob. Sizes are MB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: String,
    pub name: String,
    pub cluster: Option<String>,
    pub datacenter: Option<String>,
    pub cpus: i64,
    pub memory_mb: f64,
    pub disk_mb: f64,
    pub power_state: String,
    pub template: bool,
}

/// Maps filter identifiers to `vms` columns. Unknown names fail the
/// whole filter, which handlers surface as a validation error.
fn vm_field_map(name: &str) -> Result<String, FilterError> {
    let column = match name {
        "id" => "id",
        "name" => "name",
        "cluster" => "cluster",
        "datacenter" => "datacenter",
        "cpus" => "cpus",
        "memory" => "memory_mb",
        "disk" => "disk_mb",
        "status" => "power_state",
        "template" => "template",
        other => return Err(FilterError::UnknownField(other.to_string())),
    };
    Ok(format!("\"{column}\""))
}

/// Store for the flattened `vms` table.
pub struct VmStore {
    conn: Arc<Mutex<Connection>>,
}

impl VmStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Replace all VM rows with the given set (one collection run's view).
    pub fn replace_all(&self, records: &[VmRecord]) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM vms", [])?;
        let mut stmt = conn.prepare(
            r"
            INSERT INTO vms (id, name, cluster, datacenter, cpus, memory_mb, disk_mb, power_state, template)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )?;
        for vm in records {
            stmt.execute(duckdb::params![
                vm.id,
                vm.name,
                vm.cluster,
                vm.datacenter,
                vm.cpus,
                vm.memory_mb,
                vm.disk_mb,
                vm.power_state,
                vm.template,
            ])?;
        }
        Ok(())
    }

    /// List VMs, optionally constrained by a filter expression.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidFilter`] for malformed filters or
    /// unknown fields; handlers map that to 400.
    pub fn list(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<VmRecord>, StoreError> {
        let mut sql = String::from(
            "SELECT id, name, cluster, datacenter, cpus, memory_mb, disk_mb, power_state, template FROM vms",
        );
        let mut args = Vec::new();

        if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
            let expr = compile(filter.as_bytes(), &vm_field_map)?;
            sql.push_str(" WHERE ");
            sql.push_str(&expr.sql);
            args = expr.args;
        }

        sql.push_str(" ORDER BY name");
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(duckdb::params_from_iter(args.iter()), |row| {
            Ok(VmRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                cluster: row.get(2)?,
                datacenter: row.get(3)?,
                cpus: row.get(4)?,
                memory_mb: row.get(5)?,
                disk_mb: row.get(6)?,
                power_state: row.get(7)?,
                template: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fetch a single VM row by id.
    pub fn get(&self, id: &str) -> Result<Option<VmRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            "SELECT id, name, cluster, datacenter, cpus, memory_mb, disk_mb, power_state, template FROM vms WHERE id = ?",
            duckdb::params![id],
            |row| {
                Ok(VmRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    cluster: row.get(2)?,
                    datacenter: row.get(3)?,
                    cpus: row.get(4)?,
                    memory_mb: row.get(5)?,
                    disk_mb: row.get(6)?,
                    power_state: row.get(7)?,
                    template: row.get(8)?,
                })
            },
        ) {
            Ok(vm) => Ok(Some(vm)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
