//! vSphere operator capability. The services only see the two traits;
//! the shipped implementation drives the vCenter Automation REST API
//! over a session-authenticated reqwest client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vs_store::{Credentials, VmRecord};

use crate::error::WorkError;

/// Snapshot name used by the deep inspection flow.
pub const INSPECTION_SNAPSHOT_NAME: &str = "vscout-deep-inspection";

/// Snapshot creation parameters.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSnapshotRequest {
    pub vm_moid: String,
    pub name: String,
    pub description: String,
    pub memory: bool,
    pub quiesce: bool,
}

impl CreateSnapshotRequest {
    /// The request used by the inspection flow for one VM.
    #[must_use]
    pub fn inspection(vm_moid: impl Into<String>) -> Self {
        Self {
            vm_moid: vm_moid.into(),
            name: INSPECTION_SNAPSHOT_NAME.to_string(),
            description: String::new(),
            memory: false,
            quiesce: false,
        }
    }
}

/// One full inventory fetch: the raw blob persisted as-is plus the
/// flattened rows for the filterable `vms` table.
#[derive(Debug, Clone)]
pub struct InventoryPayload {
    pub data: Vec<u8>,
    pub vms: Vec<VmRecord>,
}

/// Operations the flows need from the virtualization manager.
#[async_trait]
pub trait VmOperator: Send + Sync {
    async fn create_snapshot(&self, req: CreateSnapshotRequest) -> Result<(), WorkError>;
    async fn fetch_inventory(&self) -> Result<InventoryPayload, WorkError>;
}

/// Opens an authenticated operator from stored credentials.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, creds: &Credentials) -> Result<Arc<dyn VmOperator>, WorkError>;
}

// =============================================================================
// REST implementation
// =============================================================================

/// Connector for the vCenter Automation REST API.
pub struct RestConnector {
    insecure: bool,
}

impl RestConnector {
    /// `insecure` skips TLS verification, which on-prem vCenters with
    /// self-signed certificates usually require.
    #[must_use]
    pub fn new(insecure: bool) -> Self {
        Self { insecure }
    }
}

#[async_trait]
impl Connector for RestConnector {
    async fn connect(&self, creds: &Credentials) -> Result<Arc<dyn VmOperator>, WorkError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.insecure)
            .build()
            .map_err(|err| WorkError::External(format!("building http client: {err}")))?;

        let base = creds.url.trim_end_matches('/').trim_end_matches("/sdk");
        info!(url = %base, "opening vCenter session");

        let response = client
            .post(format!("{base}/api/session"))
            .basic_auth(&creds.username, Some(&creds.password))
            .send()
            .await
            .map_err(|err| WorkError::External(format!("vCenter unreachable: {err}")))?;

        if !response.status().is_success() {
            return Err(WorkError::External(format!(
                "vCenter session rejected: {}",
                response.status()
            )));
        }

        let session_id: String = response
            .json()
            .await
            .map_err(|err| WorkError::External(format!("reading session id: {err}")))?;

        info!("vCenter session established");
        Ok(Arc::new(RestOperator {
            client,
            base: base.to_string(),
            session_id,
        }))
    }
}

/// Authenticated REST operator bound to one vCenter session.
pub struct RestOperator {
    client: reqwest::Client,
    base: String,
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct VmSummary {
    vm: String,
    name: String,
    power_state: String,
    cpu_count: Option<i64>,
    #[serde(rename = "memory_size_MiB")]
    memory_size_mib: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VmDetail {
    #[serde(default)]
    disks: serde_json::Map<String, serde_json::Value>,
}

impl RestOperator {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base))
            .header("vmware-api-session-id", &self.session_id)
    }

    async fn list_vms(&self) -> Result<Vec<VmSummary>, WorkError> {
        let response = self
            .request(reqwest::Method::GET, "/api/vcenter/vm")
            .send()
            .await
            .map_err(|err| WorkError::External(format!("listing VMs: {err}")))?;
        if !response.status().is_success() {
            return Err(WorkError::External(format!(
                "listing VMs: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| WorkError::External(format!("decoding VM list: {err}")))
    }

    async fn disk_capacity_mb(&self, moid: &str) -> Result<f64, WorkError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/api/vcenter/vm/{moid}"))
            .send()
            .await
            .map_err(|err| WorkError::External(format!("fetching VM {moid}: {err}")))?;
        if !response.status().is_success() {
            return Err(WorkError::External(format!(
                "fetching VM {moid}: {}",
                response.status()
            )));
        }
        let detail: VmDetail = response
            .json()
            .await
            .map_err(|err| WorkError::External(format!("decoding VM {moid}: {err}")))?;

        let bytes: i64 = detail
            .disks
            .values()
            .filter_map(|disk| disk.get("capacity").and_then(serde_json::Value::as_i64))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        Ok(bytes as f64 / (1024.0 * 1024.0))
    }
}

#[async_trait]
impl VmOperator for RestOperator {
    async fn create_snapshot(&self, req: CreateSnapshotRequest) -> Result<(), WorkError> {
        debug!(vm = %req.vm_moid, snapshot = %req.name, "creating snapshot");
        let body = serde_json::json!({
            "name": req.name,
            "description": req.description,
            "memory": req.memory,
            "quiesce": req.quiesce,
        });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/vcenter/vm/{}/snapshots", req.vm_moid),
            )
            .json(&body)
            .send()
            .await
            .map_err(|err| WorkError::External(format!("creating snapshot: {err}")))?;
        if !response.status().is_success() {
            return Err(WorkError::External(format!(
                "creating snapshot on {}: {}",
                req.vm_moid,
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch_inventory(&self) -> Result<InventoryPayload, WorkError> {
        let summaries = self.list_vms().await?;
        info!(count = summaries.len(), "fetched VM list");

        let mut vms = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let disk_mb = self.disk_capacity_mb(&summary.vm).await?;
            #[allow(clippy::cast_precision_loss)]
            vms.push(VmRecord {
                id: summary.vm,
                name: summary.name,
                cluster: None,
                datacenter: None,
                cpus: summary.cpu_count.unwrap_or(0),
                memory_mb: summary.memory_size_mib.unwrap_or(0) as f64,
                disk_mb,
                power_state: summary.power_state,
                template: false,
            });
        }

        let blob = serde_json::json!({
            "collectedAt": Utc::now().to_rfc3339(),
            "vms": vms,
        });
        let data = serde_json::to_vec(&blob)
            .map_err(|err| WorkError::External(format!("encoding inventory: {err}")))?;

        Ok(InventoryPayload { data, vms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspection_snapshot_request_defaults() {
        let req = CreateSnapshotRequest::inspection("vm-42");
        assert_eq!(req.vm_moid, "vm-42");
        assert_eq!(req.name, INSPECTION_SNAPSHOT_NAME);
        assert!(!req.memory);
        assert!(!req.quiesce);
    }

    #[test]
    fn vm_summary_decodes_rest_shape() {
        let json = r#"{
            "vm": "vm-1013",
            "name": "vm-web-01",
            "power_state": "POWERED_ON",
            "cpu_count": 2,
            "memory_size_MiB": 2048
        }"#;
        let summary: VmSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.vm, "vm-1013");
        assert_eq!(summary.memory_size_mib, Some(2048));
    }

    #[test]
    fn vm_detail_sums_disk_capacity() {
        let json = r#"{
            "disks": {
                "2000": {"capacity": 1073741824},
                "2001": {"capacity": 2147483648}
            }
        }"#;
        let detail: VmDetail = serde_json::from_str(json).unwrap();
        let bytes: i64 = detail
            .disks
            .values()
            .filter_map(|d| d.get("capacity").and_then(serde_json::Value::as_i64))
            .sum();
        assert_eq!(bytes, 3 * 1073741824);
    }
}
