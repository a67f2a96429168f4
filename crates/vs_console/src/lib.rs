//! `vs_console` - control-plane synchronization
//!
//! This crate provides:
//! - A reqwest client pushing agent status and inventory to the console
//! - A background update loop that only runs in `connected` mode and
//!   reacts to mode switches without restart
//!
//! The loop reads everything it pushes from the store, so it has no
//! coupling to the collector/inspector services.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vs_store::{AgentMode, CollectorState, Store, StoreError};

/// Console errors
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("console unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("console rejected update: {0}")]
    Rejected(reqwest::StatusCode),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Observed state of the console link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleConnection {
    Connected,
    Disconnected,
    Error,
}

impl ConsoleConnection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleConnection::Connected => "connected",
            ConsoleConnection::Disconnected => "disconnected",
            ConsoleConnection::Error => "error",
        }
    }
}

/// Snapshot of the console link for the agent status endpoint.
#[derive(Debug, Clone)]
pub struct ConsoleStatus {
    pub connection: ConsoleConnection,
    pub mode: AgentMode,
    pub error: Option<String>,
}

/// Status payload pushed to the control plane.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentUpdate {
    id: String,
    source_id: String,
    status: String,
}

/// HTTP client for the control plane.
pub struct ConsoleClient {
    client: reqwest::Client,
    base_url: String,
    agent_id: String,
    source_id: String,
}

impl ConsoleClient {
    #[must_use]
    pub fn new(base_url: &str, agent_id: &str, source_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            agent_id: agent_id.to_string(),
            source_id: source_id.to_string(),
        }
    }

    async fn push_status(&self, status: &str) -> Result<(), ConsoleError> {
        let update = AgentUpdate {
            id: self.agent_id.clone(),
            source_id: self.source_id.clone(),
            status: status.to_string(),
        };
        let response = self
            .client
            .put(format!(
                "{}/api/v1/agents/{}/status",
                self.base_url, self.agent_id
            ))
            .json(&update)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConsoleError::Rejected(response.status()));
        }
        Ok(())
    }

    async fn push_inventory(&self, data: &[u8]) -> Result<(), ConsoleError> {
        let response = self
            .client
            .put(format!(
                "{}/api/v1/sources/{}/inventory",
                self.base_url, self.source_id
            ))
            .header("content-type", "application/json")
            .body(data.to_vec())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConsoleError::Rejected(response.status()));
        }
        Ok(())
    }
}

struct ConsoleState {
    connection: ConsoleConnection,
    error: Option<String>,
}

/// Console service: owns the operating mode and the update loop.
pub struct Console {
    client: Option<ConsoleClient>,
    store: Store,
    state: Mutex<ConsoleState>,
    mode_tx: watch::Sender<AgentMode>,
}

impl Console {
    /// `client` may be `None` when no console URL is configured; the
    /// agent then behaves as permanently disconnected.
    #[must_use]
    pub fn new(client: Option<ConsoleClient>, store: Store, initial_mode: AgentMode) -> Self {
        let (mode_tx, _) = watch::channel(initial_mode);
        Self {
            client,
            store,
            state: Mutex::new(ConsoleState {
                connection: ConsoleConnection::Disconnected,
                error: None,
            }),
            mode_tx,
        }
    }

    /// Snapshot of the console link and mode.
    #[must_use]
    pub fn status(&self) -> ConsoleStatus {
        let state = self.state.lock().unwrap();
        ConsoleStatus {
            connection: state.connection,
            mode: *self.mode_tx.borrow(),
            error: state.error.clone(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> AgentMode {
        *self.mode_tx.borrow()
    }

    /// Switch the operating mode; persisted so a restart keeps it.
    pub fn set_mode(&self, mode: AgentMode) -> Result<(), StoreError> {
        self.store.agent().set_mode(mode)?;
        info!(mode = mode.as_str(), "agent mode changed");
        let _ = self.mode_tx.send(mode);
        if mode == AgentMode::Disconnected {
            let mut state = self.state.lock().unwrap();
            state.connection = ConsoleConnection::Disconnected;
            state.error = None;
        }
        Ok(())
    }

    /// Spawn the periodic update loop. Pushes happen only in connected
    /// mode; a mode switch takes effect at the next tick without
    /// restarting the loop.
    pub fn spawn_update_loop(
        self: &Arc<Self>,
        interval: std::time::Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let console = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut mode_rx = console.mode_tx.subscribe();
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = mode_rx.changed() => {}
                    _ = ticker.tick() => {
                        if *console.mode_tx.borrow() == AgentMode::Connected {
                            console.push_once().await;
                        }
                    }
                }
            }
            debug!("console update loop stopped");
        })
    }

    async fn push_once(&self) {
        let Some(client) = &self.client else {
            return;
        };

        let result = self.push_update(client).await;
        let mut state = self.state.lock().unwrap();
        match result {
            Ok(()) => {
                state.connection = ConsoleConnection::Connected;
                state.error = None;
            }
            Err(err) => {
                warn!("console update failed: {err}");
                state.connection = ConsoleConnection::Error;
                state.error = Some(err.to_string());
            }
        }
    }

    async fn push_update(&self, client: &ConsoleClient) -> Result<(), ConsoleError> {
        let status = match self.store.collector().get()? {
            Some((state, _)) => state,
            None => CollectorState::Ready,
        };
        client.push_status(status.as_str()).await?;

        match self.store.inventory().get() {
            Ok(inventory) => client.push_inventory(&inventory.data).await?,
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }
}
