//! `vs_agent` - inspection and collection execution core
//!
//! This crate provides:
//! - A single-worker [`Scheduler`] so at most one long-running vCenter
//!   operation is in flight per agent process
//! - [`WorkUnit`]s and the [`WorkBuilder`] that assembles them into
//!   connect/collect and connect/per-VM flows
//! - The [`CollectorService`] and [`InspectorService`] state machines
//! - The vSphere operator traits and a REST-session implementation
//!
//! Long-running work is serialized on the scheduler; service methods
//! are non-blocking snapshots aside from briefly holding the service
//! mutex. Drivers run under a cancellation token owned by the service
//! and observed by every scheduled unit.

mod collector;
mod error;
mod inspector;
mod scheduler;
mod status;
pub mod vsphere;
mod work;

#[cfg(test)]
pub(crate) mod test_support;

pub use collector::CollectorService;
pub use error::{AgentError, WorkError};
pub use inspector::InspectorService;
pub use scheduler::{Scheduler, WorkFuture};
pub use status::{CollectorStatus, InspectionStatus, InspectorState, InspectorStatus};
pub use work::{BuildContext, CollectorFlow, InspectorFlow, VmWork, VmsWork, WorkBuilder, WorkUnit};
