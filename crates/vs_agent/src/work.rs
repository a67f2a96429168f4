//! Work units and the builder that assembles them into flows. Units are
//! small structs behind a trait object; the SDK client they share lives
//! in a [`BuildContext`] owned by the driver and passed into every run,
//! so no unit captures another's state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vs_store::{CollectorState, InspectionState, Store};

use crate::error::WorkError;
use crate::status::{InspectionStatus, InspectorState};
use crate::vsphere::{Connector, CreateSnapshotRequest, VmOperator};

/// One unit of work in a service flow. `status()` names the state the
/// owning service publishes before running the unit.
#[async_trait]
pub trait WorkUnit<S>: Send + Sync {
    fn status(&self) -> S;
    async fn run(&self, token: CancellationToken, build: &BuildContext)
        -> Result<(), WorkError>;
}

/// Per-run shared state. The connect unit opens the SDK session exactly
/// once; later units read it. A fresh context is created for every run,
/// so a canceled connect never leaks a client into the next run.
pub struct BuildContext {
    store: Store,
    connector: Arc<dyn Connector>,
    operator: OnceCell<Arc<dyn VmOperator>>,
}

impl BuildContext {
    pub(crate) async fn establish(&self) -> Result<(), WorkError> {
        info!("loading vCenter credentials");
        let creds = self.store.credentials().get()?;

        let operator = self.connector.connect(&creds).await?;
        self.operator
            .set(operator)
            .map_err(|_| WorkError::External("session already established".into()))?;
        Ok(())
    }

    pub(crate) fn operator(&self) -> Result<Arc<dyn VmOperator>, WorkError> {
        self.operator
            .get()
            .cloned()
            .ok_or_else(|| WorkError::External("not connected".into()))
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }
}

/// A per-VM unit paired with its target.
pub struct VmWork {
    pub vm_moid: String,
    pub unit: Arc<dyn WorkUnit<InspectorState>>,
}

/// The per-VM section of an inspector flow.
pub struct VmsWork {
    pub works: Vec<VmWork>,
    pub initial: HashMap<String, InspectionStatus>,
}

/// Plan for one inspection run: connect, then each VM in order.
pub struct InspectorFlow {
    pub connect: Arc<dyn WorkUnit<InspectorState>>,
    pub inspect: VmsWork,
}

/// Plan for one collection run: connect, then the inventory fetch.
pub struct CollectorFlow {
    pub connect: Arc<dyn WorkUnit<CollectorState>>,
    pub collect: Arc<dyn WorkUnit<CollectorState>>,
}

/// Assembles flows for a target vCenter. `build` is pure with respect to
/// the captured inputs; `reset` clears them for the next run.
pub struct WorkBuilder {
    store: Store,
    connector: Arc<dyn Connector>,
    vm_moids: Vec<String>,
}

impl WorkBuilder {
    #[must_use]
    pub fn new(store: Store, connector: Arc<dyn Connector>) -> Self {
        Self {
            store,
            connector,
            vm_moids: Vec::new(),
        }
    }

    pub fn with_vms(&mut self, vm_moids: &[String]) -> &mut Self {
        self.vm_moids = vm_moids.to_vec();
        self
    }

    /// A fresh context for one run; owned by the driver.
    #[must_use]
    pub fn context(&self) -> BuildContext {
        BuildContext {
            store: self.store.clone(),
            connector: Arc::clone(&self.connector),
            operator: OnceCell::new(),
        }
    }

    /// Build the inspector flow for the captured VM list.
    #[must_use]
    pub fn build(&self) -> InspectorFlow {
        let mut works = Vec::with_capacity(self.vm_moids.len());
        let mut initial = HashMap::with_capacity(self.vm_moids.len());
        for moid in &self.vm_moids {
            works.push(VmWork {
                vm_moid: moid.clone(),
                unit: Arc::new(SnapshotUnit {
                    vm_moid: moid.clone(),
                }),
            });
            initial.insert(moid.clone(), InspectionStatus::new(InspectionState::Pending));
        }
        InspectorFlow {
            connect: Arc::new(InspectorConnectUnit),
            inspect: VmsWork { works, initial },
        }
    }

    /// Build the collector flow.
    #[must_use]
    pub fn build_collector(&self) -> CollectorFlow {
        CollectorFlow {
            connect: Arc::new(CollectorConnectUnit),
            collect: Arc::new(CollectUnit),
        }
    }

    /// Clear captured inputs so the next build starts from scratch.
    pub fn reset(&mut self) {
        self.vm_moids.clear();
    }
}

// =============================================================================
// Concrete units
// =============================================================================

struct InspectorConnectUnit;

#[async_trait]
impl WorkUnit<InspectorState> for InspectorConnectUnit {
    fn status(&self) -> InspectorState {
        InspectorState::Connecting
    }

    async fn run(
        &self,
        _token: CancellationToken,
        build: &BuildContext,
    ) -> Result<(), WorkError> {
        build.establish().await
    }
}

struct SnapshotUnit {
    vm_moid: String,
}

#[async_trait]
impl WorkUnit<InspectorState> for SnapshotUnit {
    fn status(&self) -> InspectorState {
        InspectorState::Running
    }

    async fn run(
        &self,
        _token: CancellationToken,
        build: &BuildContext,
    ) -> Result<(), WorkError> {
        let operator = build.operator()?;
        info!(vm = %self.vm_moid, "creating VM snapshot");
        operator
            .create_snapshot(CreateSnapshotRequest::inspection(&self.vm_moid))
            .await?;
        info!(vm = %self.vm_moid, "VM snapshot created");
        Ok(())
    }
}

struct CollectorConnectUnit;

#[async_trait]
impl WorkUnit<CollectorState> for CollectorConnectUnit {
    fn status(&self) -> CollectorState {
        CollectorState::Connecting
    }

    async fn run(
        &self,
        _token: CancellationToken,
        build: &BuildContext,
    ) -> Result<(), WorkError> {
        build.establish().await
    }
}

struct CollectUnit;

#[async_trait]
impl WorkUnit<CollectorState> for CollectUnit {
    fn status(&self) -> CollectorState {
        CollectorState::Collecting
    }

    async fn run(
        &self,
        _token: CancellationToken,
        build: &BuildContext,
    ) -> Result<(), WorkError> {
        let operator = build.operator()?;
        let payload = operator.fetch_inventory().await?;
        info!(vms = payload.vms.len(), "persisting inventory");
        build.store().inventory().set(&payload.data)?;
        build.store().vms().replace_all(&payload.vms)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeConnector, FakeOperator};
    use vs_store::Credentials;

    fn seeded_store() -> Store {
        let store = Store::open_memory().unwrap();
        store
            .credentials()
            .set(&Credentials {
                url: "https://vcenter.local/sdk".into(),
                username: "admin".into(),
                password: "secret".into(),
            })
            .unwrap();
        store
    }

    #[test]
    fn build_is_pure_with_respect_to_inputs() {
        let store = Store::open_memory().unwrap();
        let operator = Arc::new(FakeOperator::new());
        let mut builder = WorkBuilder::new(store, Arc::new(FakeConnector::new(operator)));
        builder.with_vms(&["vm-1".into(), "vm-2".into()]);

        let first = builder.build();
        let second = builder.build();

        let ids = |flow: &InspectorFlow| {
            flow.inspect
                .works
                .iter()
                .map(|w| w.vm_moid.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), vec!["vm-1", "vm-2"]);
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.inspect.initial.len(), 2);
        assert_eq!(
            first.inspect.initial["vm-1"].state,
            InspectionState::Pending
        );
    }

    #[test]
    fn reset_clears_captured_vms() {
        let store = Store::open_memory().unwrap();
        let operator = Arc::new(FakeOperator::new());
        let mut builder = WorkBuilder::new(store, Arc::new(FakeConnector::new(operator)));
        builder.with_vms(&["vm-1".into()]);
        builder.reset();
        assert!(builder.build().inspect.works.is_empty());
    }

    #[tokio::test]
    async fn connect_unit_establishes_operator() {
        let store = seeded_store();
        let operator = Arc::new(FakeOperator::new());
        let connector = Arc::new(FakeConnector::new(Arc::clone(&operator)));
        let builder = WorkBuilder::new(store, connector.clone());

        let context = builder.context();
        let flow = builder.build();
        flow.connect
            .run(CancellationToken::new(), &context)
            .await
            .unwrap();

        assert_eq!(connector.connect_count(), 1);
        assert!(context.operator().is_ok());
    }

    #[tokio::test]
    async fn connect_without_credentials_fails() {
        let store = Store::open_memory().unwrap();
        let operator = Arc::new(FakeOperator::new());
        let connector = Arc::new(FakeConnector::new(operator));
        let builder = WorkBuilder::new(store, connector.clone());

        let context = builder.context();
        let err = context.establish().await.unwrap_err();
        assert!(matches!(err, WorkError::Store(e) if e.is_not_found()));
        // The SDK client is never opened when credentials are missing.
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_unit_requires_connection() {
        let store = seeded_store();
        let operator = Arc::new(FakeOperator::new());
        let mut builder =
            WorkBuilder::new(store, Arc::new(FakeConnector::new(Arc::clone(&operator))));
        builder.with_vms(&["vm-1".into()]);

        let context = builder.context();
        let flow = builder.build();
        let err = flow.inspect.works[0]
            .unit
            .run(CancellationToken::new(), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkError::External(_)));
        assert!(operator.snapshot_calls().is_empty());
    }

    #[tokio::test]
    async fn fresh_context_per_run_has_no_operator() {
        let store = seeded_store();
        let operator = Arc::new(FakeOperator::new());
        let connector = Arc::new(FakeConnector::new(operator));
        let builder = WorkBuilder::new(store, connector);

        let first = builder.context();
        first.establish().await.unwrap();
        let second = builder.context();
        assert!(second.operator().is_err());
    }
}
