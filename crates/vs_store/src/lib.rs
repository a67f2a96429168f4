//! `vs_store` - DuckDB storage layer for the inspection agent
//!
//! This crate provides:
//! - Connection management and schema migrations
//! - Typed sub-stores for credentials, inventory, VM rows, per-VM
//!   inspection status, and persisted collector/agent status
//! - Query filter combinators for the inspection ledger
//!
//! All sub-stores share one `Arc<Mutex<Connection>>`; reads copy data
//! out while holding the lock and never block on I/O beyond DuckDB
//! itself.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

mod credentials;
mod filters;
mod inspection;
mod inventory;
mod migrations;
mod status;
mod vms;

pub use credentials::CredentialsStore;
pub use filters::{InspectionQueryFilter, InspectionUpdateFilter};
pub use inspection::{InspectionRow, InspectionStore};
pub use inventory::{Inventory, InventoryStore};
pub use status::{AgentStore, CollectorStatusStore};
pub use vms::{VmRecord, VmStore};

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] vs_filter::FilterError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Recognizes the resource-absence class of errors, which API
    /// handlers translate to 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Persisted collector state. Mirrors the collector service states; the
/// store only ever sees terminal-ish snapshots of the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollectorState {
    Ready,
    Connecting,
    Connected,
    Collecting,
    Collected,
    Error,
}

impl CollectorState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorState::Ready => "ready",
            CollectorState::Connecting => "connecting",
            CollectorState::Connected => "connected",
            CollectorState::Collecting => "collecting",
            CollectorState::Collected => "collected",
            CollectorState::Error => "error",
        }
    }
}

impl std::str::FromStr for CollectorState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "ready" => Ok(CollectorState::Ready),
            "connecting" => Ok(CollectorState::Connecting),
            "connected" => Ok(CollectorState::Connected),
            "collecting" => Ok(CollectorState::Collecting),
            "collected" => Ok(CollectorState::Collected),
            "error" => Ok(CollectorState::Error),
            other => Err(format!("unknown collector state: {other}")),
        }
    }
}

/// Per-VM inspection state, persisted in `vm_inspection_status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InspectionState {
    Pending,
    Running,
    Completed,
    Canceled,
    Error,
}

impl InspectionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InspectionState::Pending => "pending",
            InspectionState::Running => "running",
            InspectionState::Completed => "completed",
            InspectionState::Canceled => "canceled",
            InspectionState::Error => "error",
        }
    }
}

impl std::str::FromStr for InspectionState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(InspectionState::Pending),
            "running" => Ok(InspectionState::Running),
            "completed" => Ok(InspectionState::Completed),
            "canceled" => Ok(InspectionState::Canceled),
            "error" => Ok(InspectionState::Error),
            other => Err(format!("unknown inspection state: {other}")),
        }
    }
}

/// Agent operating mode. Persisted so a restart keeps the last choice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Connected,
    Disconnected,
}

impl AgentMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Connected => "connected",
            AgentMode::Disconnected => "disconnected",
        }
    }
}

impl std::str::FromStr for AgentMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "connected" => Ok(AgentMode::Connected),
            "disconnected" => Ok(AgentMode::Disconnected),
            other => Err(format!("unknown agent mode: {other}")),
        }
    }
}

/// vCenter credentials, owned by the store and loaded lazily by the
/// connect work unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Main storage handle
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Store {
    /// Open or create the database at `path` and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if directory creation, database opening, or
    /// migration execution fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!(path = %path.display(), "opening DuckDB database");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_string_lossy().to_string(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if setup or migrations fail.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: ":memory:".to_string(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        migrations::run_all(&conn)
    }

    #[must_use]
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    #[must_use]
    pub fn credentials(&self) -> CredentialsStore {
        CredentialsStore::new(Arc::clone(&self.conn))
    }

    #[must_use]
    pub fn inventory(&self) -> InventoryStore {
        InventoryStore::new(Arc::clone(&self.conn))
    }

    #[must_use]
    pub fn vms(&self) -> VmStore {
        VmStore::new(Arc::clone(&self.conn))
    }

    #[must_use]
    pub fn inspections(&self) -> InspectionStore {
        InspectionStore::new(Arc::clone(&self.conn))
    }

    #[must_use]
    pub fn collector(&self) -> CollectorStatusStore {
        CollectorStatusStore::new(Arc::clone(&self.conn))
    }

    #[must_use]
    pub fn agent(&self) -> AgentStore {
        AgentStore::new(Arc::clone(&self.conn))
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_rfc3339(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}
