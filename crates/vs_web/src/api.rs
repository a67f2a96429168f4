//! Wire types and the bridge from internal status enums to the on-wire
//! enums. Wire values are part of the API contract and never change with
//! internal refactors: the inspector's `connecting` phase is reported as
//! `running`, and a VM the service has never seen reports `notFound`.

use serde::{Deserialize, Serialize};

use vs_agent::{CollectorStatus, InspectionStatus, InspectorState, InspectorStatus};
use vs_console::ConsoleStatus;
use vs_store::{InspectionState, VmRecord};

/// `GET /version`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    pub git_commit: String,
}

/// `GET /status`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusReply {
    pub console_connection: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentStatusReply {
    pub fn from_status(status: &ConsoleStatus) -> Self {
        Self {
            console_connection: status.connection.as_str().to_string(),
            mode: status.mode.as_str().to_string(),
            error: status.error.clone(),
        }
    }
}

/// `PUT /status`
#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
    pub mode: String,
}

/// `GET /collector` / `POST /collector` reply
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatusReply {
    pub status: String,
    pub has_credentials: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectorStatusReply {
    pub fn from_status(status: &CollectorStatus) -> Self {
        Self {
            status: status.state.as_str().to_string(),
            has_credentials: status.has_credentials,
            error: status.error.clone(),
        }
    }
}

/// `POST /collector`
#[derive(Debug, Deserialize)]
pub struct StartCollectorRequest {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Wire rendering of the inspector service state.
pub fn inspector_state_wire(state: InspectorState) -> &'static str {
    match state {
        InspectorState::Ready => "ready",
        // The connecting phase is reported as running.
        InspectorState::Connecting | InspectorState::Running => "running",
        InspectorState::Cancelled => "canceled",
        InspectorState::Done => "done",
        InspectorState::Error => "error",
    }
}

/// Wire rendering of a per-VM inspection state.
pub fn inspection_state_wire(state: InspectionState) -> &'static str {
    match state {
        InspectionState::Pending => "pending",
        InspectionState::Running => "running",
        InspectionState::Completed => "completed",
        InspectionState::Canceled => "canceled",
        InspectionState::Error => "error",
    }
}

/// Per-VM entry in inspector replies.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmInspectionReply {
    pub id: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VmInspectionReply {
    pub fn from_status(id: &str, status: Option<&InspectionStatus>) -> Self {
        match status {
            Some(status) => Self {
                id: id.to_string(),
                state: inspection_state_wire(status.state).to_string(),
                error: status.error.clone(),
            },
            None => Self {
                id: id.to_string(),
                state: "notFound".to_string(),
                error: None,
            },
        }
    }
}

/// `GET /vms/inspector` and the start/add replies.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorStatusReply {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub vms: Vec<VmInspectionReply>,
}

impl InspectorStatusReply {
    pub fn from_status(status: &InspectorStatus, vms: Vec<VmInspectionReply>) -> Self {
        Self {
            state: inspector_state_wire(status.state).to_string(),
            error: status.error.clone(),
            vms,
        }
    }
}

/// `POST /vms/inspector` / `PATCH /vms/inspector` / `DELETE /vms/inspector`
#[derive(Debug, Deserialize)]
pub struct VmSelectionRequest {
    pub vms: Vec<String>,
}

/// One VM in the `GET /vms` listing.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmReply {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    pub cpus: i64,
    pub memory: f64,
    pub disk_size: f64,
    pub v_center_state: String,
    pub inspection: VmInspectionReply,
}

impl VmReply {
    pub fn from_record(vm: &VmRecord, inspection: Option<&InspectionStatus>) -> Self {
        Self {
            id: vm.id.clone(),
            name: vm.name.clone(),
            cluster: vm.cluster.clone(),
            datacenter: vm.datacenter.clone(),
            cpus: vm.cpus,
            memory: vm.memory_mb,
            disk_size: vm.disk_mb,
            v_center_state: vm.power_state.clone(),
            inspection: VmInspectionReply::from_status(&vm.id, inspection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspector_connecting_maps_to_running() {
        assert_eq!(inspector_state_wire(InspectorState::Connecting), "running");
        assert_eq!(inspector_state_wire(InspectorState::Running), "running");
        assert_eq!(inspector_state_wire(InspectorState::Ready), "ready");
        assert_eq!(inspector_state_wire(InspectorState::Cancelled), "canceled");
        assert_eq!(inspector_state_wire(InspectorState::Done), "done");
        assert_eq!(inspector_state_wire(InspectorState::Error), "error");
    }

    #[test]
    fn missing_vm_maps_to_not_found() {
        let reply = VmInspectionReply::from_status("vm-9", None);
        assert_eq!(reply.state, "notFound");
        assert!(reply.error.is_none());
    }

    #[test]
    fn vm_status_carries_error_text() {
        let status = InspectionStatus::with_error(InspectionState::Error, "snapshot failed");
        let reply = VmInspectionReply::from_status("vm-1", Some(&status));
        assert_eq!(reply.state, "error");
        assert_eq!(reply.error.as_deref(), Some("snapshot failed"));
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let reply = CollectorStatusReply {
            status: "ready".into(),
            has_credentials: false,
            error: None,
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert!(json.get("hasCredentials").is_some());
        assert!(json.get("error").is_none());

        let version = VersionInfo {
            version: "0.4.2".into(),
            git_commit: "abc123".into(),
        };
        let json = serde_json::to_value(&version).unwrap();
        assert!(json.get("gitCommit").is_some());
    }
}
