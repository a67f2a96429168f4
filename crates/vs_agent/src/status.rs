use serde::{Deserialize, Serialize};

use vs_store::{CollectorState, InspectionState};

/// Inspector service state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InspectorState {
    /// Waiting for an inspection request.
    Ready,
    /// Creating the vSphere session.
    Connecting,
    /// Running inspections on VMs.
    Running,
    /// User stopped the inspection.
    Cancelled,
    /// Inspection complete.
    Done,
    /// Error during inspection.
    Error,
}

impl InspectorState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InspectorState::Ready => "ready",
            InspectorState::Connecting => "connecting",
            InspectorState::Running => "running",
            InspectorState::Cancelled => "cancelled",
            InspectorState::Done => "done",
            InspectorState::Error => "error",
        }
    }
}

/// Snapshot of the inspector service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectorStatus {
    pub state: InspectorState,
    pub error: Option<String>,
}

impl InspectorStatus {
    #[must_use]
    pub fn new(state: InspectorState) -> Self {
        Self { state, error: None }
    }

    #[must_use]
    pub fn with_error(state: InspectorState, error: impl Into<String>) -> Self {
        Self {
            state,
            error: Some(error.into()),
        }
    }
}

/// Snapshot of one VM's inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionStatus {
    pub state: InspectionState,
    pub error: Option<String>,
}

impl InspectionStatus {
    #[must_use]
    pub fn new(state: InspectionState) -> Self {
        Self { state, error: None }
    }

    #[must_use]
    pub fn with_error(state: InspectionState, error: impl Into<String>) -> Self {
        Self {
            state,
            error: Some(error.into()),
        }
    }
}

/// Snapshot of the collector service. `has_credentials` tracks whether a
/// credentials row is present in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorStatus {
    pub state: CollectorState,
    pub has_credentials: bool,
    pub error: Option<String>,
}

impl CollectorStatus {
    #[must_use]
    pub fn new(state: CollectorState, has_credentials: bool) -> Self {
        Self {
            state,
            has_credentials,
            error: None,
        }
    }
}
