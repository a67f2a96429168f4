//! Inspector service: drives per-VM inspection units in submission
//! order while accepting mid-run additions and cancellations. Status
//! changes are mirrored into the store ledger so listings stay ordered
//! across restarts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vs_store::{InspectionState, InspectionUpdateFilter, Store};

use crate::error::{AgentError, WorkError};
use crate::scheduler::Scheduler;
use crate::status::{InspectionStatus, InspectorState, InspectorStatus};
use crate::work::{BuildContext, InspectorFlow, VmWork, WorkBuilder, WorkUnit};

struct Inner {
    status: InspectorStatus,
    vms_status: HashMap<String, InspectionStatus>,
    cancel: Option<CancellationToken>,
    done: Option<JoinHandle<()>>,
    works: Option<mpsc::UnboundedSender<Vec<VmWork>>>,
}

impl Inner {
    fn is_busy(&self) -> bool {
        !matches!(
            self.status.state,
            InspectorState::Ready | InspectorState::Done | InspectorState::Error
        )
    }
}

/// Per-VM deep inspection service.
pub struct InspectorService {
    scheduler: Arc<Scheduler>,
    builder: Arc<Mutex<WorkBuilder>>,
    store: Store,
    inner: Arc<Mutex<Inner>>,
}

impl InspectorService {
    #[must_use]
    pub fn new(scheduler: Arc<Scheduler>, builder: WorkBuilder, store: Store) -> Self {
        Self {
            scheduler,
            builder: Arc::new(Mutex::new(builder)),
            store,
            inner: Arc::new(Mutex::new(Inner {
                status: InspectorStatus::new(InspectorState::Ready),
                vms_status: HashMap::new(),
                cancel: None,
                done: None,
                works: None,
            })),
        }
    }

    /// Snapshot of the inspector status.
    #[must_use]
    pub fn get_status(&self) -> InspectorStatus {
        self.inner.lock().unwrap().status.clone()
    }

    /// Snapshot of one VM's status; `None` when the id was never part of
    /// a run.
    #[must_use]
    pub fn get_vm_status(&self, vm_moid: &str) -> Option<InspectionStatus> {
        self.inner.lock().unwrap().vms_status.get(vm_moid).cloned()
    }

    /// Snapshot of every VM's status.
    #[must_use]
    pub fn get_all_vm_status(&self) -> HashMap<String, InspectionStatus> {
        self.inner.lock().unwrap().vms_status.clone()
    }

    /// Begin inspecting the given VMs.
    ///
    /// # Errors
    ///
    /// [`AgentError::AlreadyInProgress`] when a run is in flight.
    pub fn start(&self, vm_moids: &[String]) -> Result<(), AgentError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_busy() {
            return Err(AgentError::AlreadyInProgress);
        }

        info!(vm_count = vm_moids.len(), "starting inspector");

        let (flow, context) = {
            let mut builder = self.builder.lock().unwrap();
            builder.reset();
            builder.with_vms(vm_moids);
            (builder.build(), Arc::new(builder.context()))
        };

        // Reset the ledger for the new run before anything is visible.
        self.store.inspections().clear()?;
        for work in &flow.inspect.works {
            self.store
                .inspections()
                .upsert(&work.vm_moid, InspectionState::Pending, None)?;
        }

        let cancel = CancellationToken::new();
        let (works_tx, works_rx) = mpsc::unbounded_channel();

        inner.status = InspectorStatus::new(InspectorState::Running);
        inner.vms_status = flow.inspect.initial.clone();
        inner.cancel = Some(cancel.clone());
        inner.works = Some(works_tx);
        inner.done = Some(tokio::spawn(Self::run(
            Arc::clone(&self.inner),
            Arc::clone(&self.builder),
            Arc::clone(&self.scheduler),
            self.store.clone(),
            flow,
            context,
            works_rx,
            cancel,
        )));

        Ok(())
    }

    /// Queue additional VMs onto the running driver. Ids already part of
    /// the run are ignored.
    ///
    /// # Errors
    ///
    /// [`AgentError::NotRunning`] when no driver is live;
    /// [`AgentError::AllVmsQueued`] when every id is already queued.
    pub fn add_more_vms(&self, vm_moids: &[String]) -> Result<(), AgentError> {
        let (filtered, works_tx) = {
            let inner = self.inner.lock().unwrap();
            if !inner.is_busy() {
                return Err(AgentError::NotRunning);
            }
            let works_tx = inner.works.clone().ok_or(AgentError::NotRunning)?;
            let filtered: Vec<String> = vm_moids
                .iter()
                .filter(|moid| !inner.vms_status.contains_key(*moid))
                .cloned()
                .collect();
            (filtered, works_tx)
        };

        if filtered.is_empty() {
            return Err(AgentError::AllVmsQueued);
        }

        info!(vm_count = filtered.len(), "adding VMs to running inspection");
        let flow = {
            let mut builder = self.builder.lock().unwrap();
            builder.reset();
            builder.with_vms(&filtered);
            builder.build()
        };

        works_tx
            .send(flow.inspect.works)
            .map_err(|_| AgentError::NotRunning)?;
        Ok(())
    }

    /// Mark the listed VMs canceled, whatever state they are in.
    pub fn cancel_vms_inspection(&self, vm_moids: &[String]) {
        for moid in vm_moids {
            self.set_vm_status(moid, InspectionStatus::new(InspectionState::Canceled));
        }
    }

    /// Mark every pending VM canceled.
    pub fn cancel_all_vms_inspection(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            for status in inner.vms_status.values_mut() {
                if status.state == InspectionState::Pending {
                    *status = InspectionStatus::new(InspectionState::Canceled);
                }
            }
        }
        let filter = InspectionUpdateFilter::new().by_state(&[InspectionState::Pending]);
        if let Err(err) = self
            .store
            .inspections()
            .update_status(&filter, InspectionState::Canceled)
        {
            warn!("failed to persist cancellation: {err}");
        }
    }

    /// Cancel the driver and wait for it to finish.
    pub async fn stop(&self) {
        let (cancel, done) = {
            let mut inner = self.inner.lock().unwrap();
            (inner.cancel.take(), inner.done.take())
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(done) = done {
            let _ = done.await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        inner: Arc<Mutex<Inner>>,
        builder: Arc<Mutex<WorkBuilder>>,
        scheduler: Arc<Scheduler>,
        store: Store,
        flow: InspectorFlow,
        context: Arc<BuildContext>,
        mut works_rx: mpsc::UnboundedReceiver<Vec<VmWork>>,
        cancel: CancellationToken,
    ) {
        let mut connect_error = None;

        match Self::do_one_unit(&inner, &scheduler, &cancel, &flow.connect, &context).await {
            Err(WorkError::Canceled) => {
                // Full cancellation is a clean terminal state.
                debug!("inspector canceled before connecting");
            }
            Err(err) => {
                error!("inspector failed to connect: {err}");
                connect_error = Some(err.to_string());
            }
            Ok(()) => {
                let mut pending: VecDeque<VmWork> = flow.inspect.works.into();

                while !pending.is_empty() {
                    // Drain waiting batches before working so additions
                    // land at the tail as soon as they arrive.
                    while let Ok(batch) = works_rx.try_recv() {
                        for work in &batch {
                            Self::mark_added(&inner, &store, &work.vm_moid);
                        }
                        pending.extend(batch);
                    }

                    let Some(work) = pending.pop_front() else { break };

                    let current = inner
                        .lock()
                        .unwrap()
                        .vms_status
                        .get(&work.vm_moid)
                        .map(|s| s.state);
                    if current == Some(InspectionState::Canceled) {
                        debug!(vm = %work.vm_moid, "skipping canceled VM inspection");
                        continue;
                    }

                    Self::publish_vm(
                        &inner,
                        &store,
                        &work.vm_moid,
                        InspectionStatus::new(InspectionState::Running),
                    );

                    match Self::do_one_unit(&inner, &scheduler, &cancel, &work.unit, &context)
                        .await
                    {
                        Err(err) if err.is_recoverable() => {
                            warn!(vm = %work.vm_moid, "VM inspection failed: {err}");
                            Self::publish_vm(
                                &inner,
                                &store,
                                &work.vm_moid,
                                InspectionStatus::with_error(InspectionState::Error, err.to_string()),
                            );
                        }
                        Err(_) => break,
                        Ok(()) => {
                            debug!(vm = %work.vm_moid, "VM inspection completed");
                            Self::publish_vm(
                                &inner,
                                &store,
                                &work.vm_moid,
                                InspectionStatus::new(InspectionState::Completed),
                            );
                        }
                    }
                }
            }
        }

        // Finalize: the builder forgets the run, VMs the run never got to
        // become canceled, and the terminal status is `done` unless
        // connecting failed outright.
        builder.lock().unwrap().reset();
        let leftovers = {
            let mut guard = inner.lock().unwrap();
            let leftovers: Vec<String> = guard
                .vms_status
                .iter()
                .filter(|(_, status)| {
                    matches!(
                        status.state,
                        InspectionState::Pending | InspectionState::Running
                    )
                })
                .map(|(moid, _)| moid.clone())
                .collect();
            for moid in &leftovers {
                guard
                    .vms_status
                    .insert(moid.clone(), InspectionStatus::new(InspectionState::Canceled));
            }
            guard.status = match connect_error {
                Some(message) => InspectorStatus::with_error(InspectorState::Error, message),
                None => InspectorStatus::new(InspectorState::Done),
            };
            guard.cancel = None;
            guard.works = None;
            guard.done = None;
            leftovers
        };
        for moid in &leftovers {
            if let Err(err) = store
                .inspections()
                .upsert(moid, InspectionState::Canceled, None)
            {
                warn!(vm = %moid, "failed to persist inspection status: {err}");
            }
        }
        info!("inspector finished work");
    }

    async fn do_one_unit(
        inner: &Arc<Mutex<Inner>>,
        scheduler: &Scheduler,
        cancel: &CancellationToken,
        unit: &Arc<dyn WorkUnit<InspectorState>>,
        context: &Arc<BuildContext>,
    ) -> Result<(), WorkError> {
        let next = unit.status();
        {
            let mut guard = inner.lock().unwrap();
            if guard.status.state != next {
                guard.status = InspectorStatus::new(next);
                debug!(state = next.as_str(), "inspector changed state");
            }
        }

        let unit = Arc::clone(unit);
        let context = Arc::clone(context);
        let mut future = scheduler
            .add_work(move |token| async move { unit.run(token, &context).await }.boxed());

        tokio::select! {
            () = cancel.cancelled() => {
                future.stop();
                Err(WorkError::Canceled)
            }
            result = future.recv() => match result {
                Ok(()) => Ok(()),
                Err(err @ (WorkError::Canceled | WorkError::SchedulerClosed)) => Err(err),
                Err(err) => Err(WorkError::Inspection(format!(
                    "work finished with error: {err}"
                ))),
            },
        }
    }

    /// Register a freshly added VM as pending. A cancellation that raced
    /// ahead of the batch wins.
    fn mark_added(inner: &Arc<Mutex<Inner>>, store: &Store, vm_moid: &str) {
        {
            let mut guard = inner.lock().unwrap();
            match guard.vms_status.get(vm_moid).map(|s| s.state) {
                Some(InspectionState::Canceled) => return,
                _ => {
                    guard
                        .vms_status
                        .insert(vm_moid.to_string(), InspectionStatus::new(InspectionState::Pending));
                }
            }
        }
        if let Err(err) = store
            .inspections()
            .upsert(vm_moid, InspectionState::Pending, None)
        {
            warn!(vm = %vm_moid, "failed to persist inspection status: {err}");
        }
    }

    /// Publish a VM status change unless the VM was canceled in the
    /// meantime; a canceled VM never moves to running or completed.
    fn publish_vm(
        inner: &Arc<Mutex<Inner>>,
        store: &Store,
        vm_moid: &str,
        status: InspectionStatus,
    ) {
        {
            let mut guard = inner.lock().unwrap();
            if guard.vms_status.get(vm_moid).map(|s| s.state)
                == Some(InspectionState::Canceled)
            {
                return;
            }
            guard.vms_status.insert(vm_moid.to_string(), status.clone());
        }
        if let Err(err) =
            self_persist(store, vm_moid, &status)
        {
            warn!(vm = %vm_moid, "failed to persist inspection status: {err}");
        }
    }

    fn set_vm_status(&self, vm_moid: &str, status: InspectionStatus) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.vms_status.insert(vm_moid.to_string(), status.clone());
        }
        if let Err(err) = self_persist(&self.store, vm_moid, &status) {
            warn!(vm = %vm_moid, "failed to persist inspection status: {err}");
        }
    }
}

fn self_persist(
    store: &Store,
    vm_moid: &str,
    status: &InspectionStatus,
) -> Result<(), vs_store::StoreError> {
    store
        .inspections()
        .upsert(vm_moid, status.state, status.error.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{wait_until, FakeConnector, FakeOperator};
    use vs_store::{Credentials, InspectionQueryFilter};

    struct Harness {
        service: InspectorService,
        operator: Arc<FakeOperator>,
        connector: Arc<FakeConnector>,
        store: Store,
    }

    fn harness() -> Harness {
        let store = Store::open_memory().unwrap();
        store
            .credentials()
            .set(&Credentials {
                url: "https://vc/sdk".into(),
                username: "admin".into(),
                password: "secret".into(),
            })
            .unwrap();

        let operator = Arc::new(FakeOperator::new());
        let connector = Arc::new(FakeConnector::new(Arc::clone(&operator)));
        let builder = WorkBuilder::new(store.clone(), Arc::clone(&connector) as _);
        let service = InspectorService::new(Arc::new(Scheduler::new()), builder, store.clone());
        Harness {
            service,
            operator,
            connector,
            store,
        }
    }

    fn moids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    async fn wait_done(service: &InspectorService) {
        wait_until(|| async {
            matches!(
                service.get_status().state,
                InspectorState::Done | InspectorState::Error
            )
        })
        .await;
    }

    #[tokio::test]
    async fn happy_path_completes_all_vms_in_order() {
        let h = harness();
        h.service.start(&moids(&["vm-a", "vm-b", "vm-c"])).unwrap();
        wait_done(&h.service).await;

        assert_eq!(h.service.get_status().state, InspectorState::Done);
        assert_eq!(h.operator.snapshot_calls(), vec!["vm-a", "vm-b", "vm-c"]);
        for vm in ["vm-a", "vm-b", "vm-c"] {
            assert_eq!(
                h.service.get_vm_status(vm).unwrap().state,
                InspectionState::Completed
            );
        }
    }

    #[tokio::test]
    async fn unknown_vm_status_is_none() {
        let h = harness();
        assert!(h.service.get_vm_status("vm-unknown").is_none());
    }

    #[tokio::test]
    async fn canceled_vm_never_runs() {
        let h = harness();
        let release = h.operator.hold_next_snapshot();

        h.service.start(&moids(&["vm-a", "vm-b", "vm-c"])).unwrap();
        // Wait until vm-a is being worked on, then cancel vm-c.
        wait_until(|| async {
            h.service.get_vm_status("vm-a").map(|s| s.state) == Some(InspectionState::Running)
        })
        .await;
        h.service.cancel_vms_inspection(&moids(&["vm-c"]));
        release.notify_one();
        wait_done(&h.service).await;

        assert_eq!(h.operator.snapshot_calls(), vec!["vm-a", "vm-b"]);
        assert_eq!(
            h.service.get_vm_status("vm-c").unwrap().state,
            InspectionState::Canceled
        );
        assert_eq!(
            h.service.get_vm_status("vm-a").unwrap().state,
            InspectionState::Completed
        );
    }

    #[tokio::test]
    async fn mid_run_add_appends_to_tail() {
        let h = harness();
        let release = h.operator.hold_next_snapshot();

        h.service.start(&moids(&["vm-a", "vm-b"])).unwrap();
        wait_until(|| async {
            h.service.get_vm_status("vm-a").map(|s| s.state) == Some(InspectionState::Running)
        })
        .await;

        h.service.add_more_vms(&moids(&["vm-c"])).unwrap();
        release.notify_one();
        wait_done(&h.service).await;

        // vm-c runs after the VMs that were already queued.
        assert_eq!(h.operator.snapshot_calls(), vec!["vm-a", "vm-b", "vm-c"]);
        for vm in ["vm-a", "vm-b", "vm-c"] {
            assert_eq!(
                h.service.get_vm_status(vm).unwrap().state,
                InspectionState::Completed
            );
        }
    }

    #[tokio::test]
    async fn add_rejects_when_not_running() {
        let h = harness();
        let err = h.service.add_more_vms(&moids(&["vm-x"])).unwrap_err();
        assert!(matches!(err, AgentError::NotRunning));
    }

    #[tokio::test]
    async fn add_rejects_duplicates_only() {
        let h = harness();
        let release = h.operator.hold_next_snapshot();
        h.service.start(&moids(&["vm-a"])).unwrap();
        wait_until(|| async {
            h.service.get_vm_status("vm-a").map(|s| s.state) == Some(InspectionState::Running)
        })
        .await;

        let err = h.service.add_more_vms(&moids(&["vm-a"])).unwrap_err();
        assert!(matches!(err, AgentError::AllVmsQueued));

        release.notify_one();
        wait_done(&h.service).await;
    }

    #[tokio::test]
    async fn start_rejected_while_busy() {
        let h = harness();
        let release = h.operator.hold_next_snapshot();
        h.service.start(&moids(&["vm-a"])).unwrap();

        let err = h.service.start(&moids(&["vm-b"])).unwrap_err();
        assert!(matches!(err, AgentError::AlreadyInProgress));

        release.notify_one();
        wait_done(&h.service).await;
    }

    #[tokio::test]
    async fn connect_failure_is_terminal_error() {
        let h = harness();
        h.connector.fail_with("login failed");
        h.service.start(&moids(&["vm-a"])).unwrap();
        wait_done(&h.service).await;

        let status = h.service.get_status();
        assert_eq!(status.state, InspectorState::Error);
        assert!(status.error.unwrap().contains("login failed"));
        assert!(h.operator.snapshot_calls().is_empty());

        // Terminal error is not busy: a new start is accepted.
        h.connector.clear_fail();
        h.service.start(&moids(&["vm-a"])).unwrap();
        wait_done(&h.service).await;
        assert_eq!(h.service.get_status().state, InspectorState::Done);
    }

    #[tokio::test]
    async fn per_vm_error_continues_with_next() {
        let h = harness();
        h.operator.fail_vm("vm-b");
        h.service.start(&moids(&["vm-a", "vm-b", "vm-c"])).unwrap();
        wait_done(&h.service).await;

        assert_eq!(h.service.get_status().state, InspectorState::Done);
        assert_eq!(
            h.service.get_vm_status("vm-a").unwrap().state,
            InspectionState::Completed
        );
        let failed = h.service.get_vm_status("vm-b").unwrap();
        assert_eq!(failed.state, InspectionState::Error);
        assert!(failed.error.unwrap().contains("snapshot failed"));
        assert_eq!(
            h.service.get_vm_status("vm-c").unwrap().state,
            InspectionState::Completed
        );
    }

    #[tokio::test]
    async fn no_zombie_vms_after_run() {
        let h = harness();
        h.operator.fail_vm("vm-b");
        h.service.start(&moids(&["vm-a", "vm-b"])).unwrap();
        wait_until(|| async { h.service.get_status().state == InspectorState::Done }).await;
        h.service.cancel_vms_inspection(&moids(&["vm-z"]));

        for (moid, status) in h.service.get_all_vm_status() {
            assert!(
                matches!(
                    status.state,
                    InspectionState::Completed | InspectionState::Canceled | InspectionState::Error
                ),
                "{moid} left in {:?}",
                status.state
            );
        }
    }

    #[tokio::test]
    async fn cancel_all_marks_pending_only() {
        let h = harness();
        let release = h.operator.hold_next_snapshot();
        h.service.start(&moids(&["vm-a", "vm-b", "vm-c"])).unwrap();
        wait_until(|| async {
            h.service.get_vm_status("vm-a").map(|s| s.state) == Some(InspectionState::Running)
        })
        .await;

        h.service.cancel_all_vms_inspection();
        release.notify_one();
        wait_done(&h.service).await;

        // vm-a was already running and completes; the pending tail is
        // canceled and never reaches the operator.
        assert_eq!(h.operator.snapshot_calls(), vec!["vm-a"]);
        assert_eq!(
            h.service.get_vm_status("vm-a").unwrap().state,
            InspectionState::Completed
        );
        for vm in ["vm-b", "vm-c"] {
            assert_eq!(
                h.service.get_vm_status(vm).unwrap().state,
                InspectionState::Canceled
            );
        }
    }

    #[tokio::test]
    async fn stop_is_prompt_and_idempotent() {
        let h = harness();
        let _release = h.operator.hold_next_snapshot();
        h.service.start(&moids(&["vm-a", "vm-b"])).unwrap();
        wait_until(|| async {
            h.service.get_vm_status("vm-a").map(|s| s.state) == Some(InspectionState::Running)
        })
        .await;

        h.service.stop().await;
        assert_eq!(h.service.get_status().state, InspectorState::Done);
        // Second stop has nothing to do.
        h.service.stop().await;

        // The aborted and never-reached VMs end up canceled, not stuck.
        assert_eq!(
            h.service.get_vm_status("vm-a").unwrap().state,
            InspectionState::Canceled
        );
        assert_eq!(
            h.service.get_vm_status("vm-b").unwrap().state,
            InspectionState::Canceled
        );
    }

    #[tokio::test]
    async fn statuses_are_mirrored_to_the_store() {
        let h = harness();
        h.service.start(&moids(&["vm-a", "vm-b"])).unwrap();
        wait_done(&h.service).await;

        let rows = h
            .store
            .inspections()
            .list(&InspectionQueryFilter::new().order_by_sequence())
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.vm_id.as_str()).collect();
        assert_eq!(ids, vec!["vm-a", "vm-b"]);
        assert!(rows.iter().all(|r| r.status == InspectionState::Completed));
    }
}
