//! `vs_web` - HTTP API for the inspection agent
//!
//! This crate provides:
//! - The axum router over the collector, inspector, and console services
//! - JSON error responses with the 404/409/400 mapping the API promises
//! - The status bridge translating internal enums to wire enums

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use vs_agent::{AgentError, CollectorService, InspectorService};
use vs_console::Console;
use vs_store::{InspectionQueryFilter, Store, StoreError};

pub mod api;

pub use api::VersionInfo;

/// Web layer errors, mapped onto status codes in `IntoResponse`.
#[derive(Error, Debug)]
pub enum WebError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for WebError {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            WebError::NotFound(err.to_string())
        } else if matches!(err, StoreError::InvalidFilter(_)) {
            WebError::Validation(err.to_string())
        } else {
            WebError::Internal(err.to_string())
        }
    }
}

impl From<AgentError> for WebError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::AlreadyRunning | AgentError::AlreadyInProgress => {
                WebError::Conflict(err.to_string())
            }
            AgentError::NotRunning | AgentError::AllVmsQueued => {
                WebError::Validation(err.to_string())
            }
            AgentError::Store(err) => err.into(),
            AgentError::Work(err) => WebError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::Validation(_) => StatusCode::BAD_REQUEST,
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::Conflict(_) => StatusCode::CONFLICT,
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {self}");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Shared handler state.
pub struct AppState {
    pub store: Store,
    pub collector: Arc<CollectorService>,
    pub inspector: Arc<InspectorService>,
    pub console: Arc<Console>,
    pub version: VersionInfo,
    pub agent_id: String,
}

/// HTTP server wrapper.
pub struct WebServer {
    state: Arc<AppState>,
    bind_address: String,
    port: u16,
}

impl WebServer {
    #[must_use]
    pub fn new(state: Arc<AppState>, bind_address: &str, port: u16) -> Self {
        Self {
            state,
            bind_address: bind_address.to_string(),
            port,
        }
    }

    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Serve until the shutdown token fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WebError> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|err| WebError::Internal(format!("binding {addr}: {err}")))?;
        info!(%addr, "starting agent API");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|err| WebError::Internal(err.to_string()))?;
        Ok(())
    }
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/version", get(version_handler))
        .route("/inventory", get(inventory_handler))
        .route("/status", get(agent_status_handler).put(set_mode_handler))
        .route(
            "/collector",
            get(collector_status_handler).post(start_collector_handler),
        )
        .route("/vms", get(vms_handler))
        .route(
            "/vms/inspector",
            get(inspector_status_handler)
                .post(start_inspection_handler)
                .patch(add_vms_handler)
                .delete(cancel_inspection_handler),
        )
        .route("/vms/{id}/inspector", get(vm_inspection_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Version & inventory
// =============================================================================

async fn version_handler(State(state): State<Arc<AppState>>) -> Json<VersionInfo> {
    Json(state.version.clone())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InventoryParams {
    #[serde(default)]
    with_agent_id: bool,
}

async fn inventory_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InventoryParams>,
) -> Result<Json<serde_json::Value>, WebError> {
    let inventory = state.store.inventory().get()?;
    let value: serde_json::Value = serde_json::from_slice(&inventory.data)
        .map_err(|err| WebError::Internal(format!("error unmarshalling inventory: {err}")))?;

    if !params.with_agent_id {
        return Ok(Json(value));
    }

    let agent_id = Uuid::parse_str(&state.agent_id)
        .map_err(|err| WebError::Internal(format!("invalid agent id: {err}")))?;
    Ok(Json(serde_json::json!({
        "inventory": value,
        "agentId": agent_id,
    })))
}

// =============================================================================
// Agent status & mode
// =============================================================================

async fn agent_status_handler(State(state): State<Arc<AppState>>) -> Json<api::AgentStatusReply> {
    Json(api::AgentStatusReply::from_status(&state.console.status()))
}

async fn set_mode_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<api::SetModeRequest>,
) -> Result<Json<api::AgentStatusReply>, WebError> {
    let mode = request
        .mode
        .parse()
        .map_err(|err: String| WebError::Validation(err))?;
    state
        .console
        .set_mode(mode)
        .map_err(|err| WebError::Internal(err.to_string()))?;
    Ok(Json(api::AgentStatusReply::from_status(
        &state.console.status(),
    )))
}

// =============================================================================
// Collector
// =============================================================================

async fn collector_status_handler(
    State(state): State<Arc<AppState>>,
) -> Json<api::CollectorStatusReply> {
    Json(api::CollectorStatusReply::from_status(
        &state.collector.status(),
    ))
}

async fn start_collector_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<api::StartCollectorRequest>,
) -> Result<Json<api::CollectorStatusReply>, WebError> {
    if request.url.trim().is_empty() {
        return Err(WebError::Validation("url must not be empty".to_string()));
    }
    state
        .collector
        .start(&request.url, &request.username, &request.password)?;
    Ok(Json(api::CollectorStatusReply::from_status(
        &state.collector.status(),
    )))
}

// =============================================================================
// VMs & inspector
// =============================================================================

#[derive(Debug, Deserialize)]
struct VmListParams {
    filter: Option<String>,
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

async fn vms_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VmListParams>,
) -> Result<Json<Vec<api::VmReply>>, WebError> {
    let records = state
        .store
        .vms()
        .list(params.filter.as_deref(), params.limit, params.offset)?;
    let replies = records
        .iter()
        .map(|vm| {
            let inspection = state.inspector.get_vm_status(&vm.id);
            api::VmReply::from_record(vm, inspection.as_ref())
        })
        .collect();
    Ok(Json(replies))
}

fn inspector_reply(state: &AppState) -> Result<api::InspectorStatusReply, WebError> {
    // The ledger keeps submission order across restarts.
    let rows = state
        .store
        .inspections()
        .list(&InspectionQueryFilter::new().order_by_sequence())?;
    let vms = rows
        .iter()
        .map(|row| {
            let status = state.inspector.get_vm_status(&row.vm_id);
            api::VmInspectionReply::from_status(&row.vm_id, status.as_ref())
        })
        .collect();
    Ok(api::InspectorStatusReply::from_status(
        &state.inspector.get_status(),
        vms,
    ))
}

async fn inspector_status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<api::InspectorStatusReply>, WebError> {
    Ok(Json(inspector_reply(&state)?))
}

async fn start_inspection_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<api::VmSelectionRequest>,
) -> Result<Json<api::InspectorStatusReply>, WebError> {
    if request.vms.is_empty() {
        return Err(WebError::Validation("vms must not be empty".to_string()));
    }
    state.inspector.start(&request.vms)?;
    Ok(Json(inspector_reply(&state)?))
}

async fn add_vms_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<api::VmSelectionRequest>,
) -> Result<Json<api::InspectorStatusReply>, WebError> {
    if request.vms.is_empty() {
        return Err(WebError::Validation("vms must not be empty".to_string()));
    }
    state.inspector.add_more_vms(&request.vms)?;
    Ok(Json(inspector_reply(&state)?))
}

async fn cancel_inspection_handler(
    State(state): State<Arc<AppState>>,
    request: Option<Json<api::VmSelectionRequest>>,
) -> Result<Json<api::InspectorStatusReply>, WebError> {
    match request {
        Some(Json(request)) if !request.vms.is_empty() => {
            state.inspector.cancel_vms_inspection(&request.vms);
        }
        _ => state.inspector.cancel_all_vms_inspection(),
    }
    Ok(Json(inspector_reply(&state)?))
}

async fn vm_inspection_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<api::VmInspectionReply> {
    let status = state.inspector.get_vm_status(&id);
    Json(api::VmInspectionReply::from_status(&id, status.as_ref()))
}
