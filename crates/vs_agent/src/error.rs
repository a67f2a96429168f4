use thiserror::Error;

use vs_store::StoreError;

/// Errors surfaced by scheduled work units and the scheduler itself.
#[derive(Error, Debug)]
pub enum WorkError {
    /// The unit's cancellation token fired before or during the run.
    #[error("context canceled")]
    Canceled,

    /// The scheduler stopped accepting or delivering work.
    #[error("scheduler is shutting down")]
    SchedulerClosed,

    /// The unit panicked; the worker recovered and reports the payload.
    #[error("work unit panicked: {0}")]
    Panic(String),

    /// Recoverable per-VM inspection failure. The inspector marks the VM
    /// `error` and moves on to the next one.
    #[error("{0}")]
    Inspection(String),

    /// SDK or connection failure from the virtualization manager.
    #[error("{0}")]
    External(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkError {
    /// Whether the inspector driver may continue with the next VM.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WorkError::Inspection(_))
    }
}

/// Service-level errors returned synchronously to callers.
#[derive(Error, Debug)]
pub enum AgentError {
    /// A collection run is already in flight.
    #[error("collection already in progress")]
    AlreadyRunning,

    /// An inspection run is already in flight.
    #[error("inspection already in progress")]
    AlreadyInProgress,

    /// No inspection driver is running to receive the request.
    #[error("no inspection in progress")]
    NotRunning,

    /// Every requested VM is already part of the current run.
    #[error("all vms already sent")]
    AllVmsQueued,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Work(#[from] WorkError),
}
