//! Collector service: drives one connect/collect flow at a time and
//! publishes a snapshot status. A completed collection survives restart
//! through the persisted status row and inventory blob.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vs_store::{CollectorState, Credentials, Store};

use crate::error::{AgentError, WorkError};
use crate::scheduler::Scheduler;
use crate::status::CollectorStatus;
use crate::work::{BuildContext, CollectorFlow, WorkBuilder, WorkUnit};

struct Inner {
    status: CollectorStatus,
    cancel: Option<CancellationToken>,
    done: Option<JoinHandle<()>>,
}

impl Inner {
    fn is_busy(&self) -> bool {
        matches!(
            self.status.state,
            CollectorState::Connecting | CollectorState::Connected | CollectorState::Collecting
        )
    }
}

/// One-shot inventory collection service.
pub struct CollectorService {
    scheduler: Arc<Scheduler>,
    builder: Arc<Mutex<WorkBuilder>>,
    store: Store,
    inner: Arc<Mutex<Inner>>,
}

impl CollectorService {
    /// Create the service, recovering a `collected` state persisted by a
    /// previous process. Any other persisted state starts over as
    /// `ready`.
    pub fn new(
        scheduler: Arc<Scheduler>,
        builder: WorkBuilder,
        store: Store,
    ) -> Result<Self, AgentError> {
        let has_credentials = store.credentials().exists()?;
        let status = match store.collector().get()? {
            Some((CollectorState::Collected, _)) => {
                info!("recovered collected inventory from store");
                CollectorStatus::new(CollectorState::Collected, has_credentials)
            }
            _ => CollectorStatus::new(CollectorState::Ready, has_credentials),
        };

        Ok(Self {
            scheduler,
            builder: Arc::new(Mutex::new(builder)),
            store,
            inner: Arc::new(Mutex::new(Inner {
                status,
                cancel: None,
                done: None,
            })),
        })
    }

    /// Snapshot of the current status; never blocks beyond the service
    /// mutex.
    #[must_use]
    pub fn status(&self) -> CollectorStatus {
        self.inner.lock().unwrap().status.clone()
    }

    /// Store credentials (overwriting any previous ones) and spawn the
    /// collection driver.
    ///
    /// # Errors
    ///
    /// [`AgentError::AlreadyRunning`] when a collection is in flight.
    pub fn start(&self, url: &str, username: &str, password: &str) -> Result<(), AgentError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_busy() {
            return Err(AgentError::AlreadyRunning);
        }

        self.store.credentials().set(&Credentials {
            url: url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })?;
        info!(url, "starting collector");

        let (flow, context) = {
            let mut builder = self.builder.lock().unwrap();
            builder.reset();
            (builder.build_collector(), Arc::new(builder.context()))
        };

        let cancel = CancellationToken::new();
        inner.status = CollectorStatus::new(CollectorState::Connecting, true);
        inner.cancel = Some(cancel.clone());
        inner.done = Some(tokio::spawn(Self::run(
            Arc::clone(&self.inner),
            Arc::clone(&self.scheduler),
            self.store.clone(),
            flow,
            context,
            cancel,
        )));

        Ok(())
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

    async fn run(
        inner: Arc<Mutex<Inner>>,
        scheduler: Arc<Scheduler>,
        store: Store,
        flow: CollectorFlow,
        context: Arc<BuildContext>,
        cancel: CancellationToken,
    ) {
        Self::publish(&inner, &store, flow.connect.status(), None);
        if let Err(err) = Self::do_unit(&scheduler, &cancel, &flow.connect, &context).await {
            error!("collector failed to connect: {err}");
            Self::publish(&inner, &store, CollectorState::Error, Some(err.to_string()));
            Self::clear_handles(&inner);
            return;
        }
        Self::publish(&inner, &store, CollectorState::Connected, None);

        Self::publish(&inner, &store, flow.collect.status(), None);
        match Self::do_unit(&scheduler, &cancel, &flow.collect, &context).await {
            Err(err) => {
                error!("collection failed: {err}");
                Self::publish(&inner, &store, CollectorState::Error, Some(err.to_string()));
            }
            Ok(()) => {
                info!("inventory collected");
                Self::publish(&inner, &store, CollectorState::Collected, None);
            }
        }
        Self::clear_handles(&inner);
    }

    async fn do_unit(
        scheduler: &Scheduler,
        cancel: &CancellationToken,
        unit: &Arc<dyn WorkUnit<CollectorState>>,
        context: &Arc<BuildContext>,
    ) -> Result<(), WorkError> {
        let unit = Arc::clone(unit);
        let context = Arc::clone(context);
        let mut future = scheduler
            .add_work(move |token| async move { unit.run(token, &context).await }.boxed());

        tokio::select! {
            () = cancel.cancelled() => {
                future.stop();
                Err(WorkError::Canceled)
            }
            result = future.recv() => result,
        }
    }

    fn publish(
        inner: &Arc<Mutex<Inner>>,
        store: &Store,
        state: CollectorState,
        error: Option<String>,
    ) {
        {
            let mut guard = inner.lock().unwrap();
            guard.status.state = state;
            guard.status.error = error.clone();
        }
        if let Err(err) = store.collector().set(state, error.as_deref()) {
            warn!("failed to persist collector status: {err}");
        }
    }

    fn clear_handles(inner: &Arc<Mutex<Inner>>) {
        let mut guard = inner.lock().unwrap();
        guard.cancel = None;
        guard.done = None;
    }
}
