//! Shared fakes for service tests: a scriptable operator/connector pair
//! and a polling helper for driver completion.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use vs_store::{Credentials, VmRecord};

use crate::error::WorkError;
use crate::vsphere::{Connector, CreateSnapshotRequest, InventoryPayload, VmOperator};

/// Fake operator recording snapshot calls. Individual VMs can be set to
/// fail, and an optional one-shot gate blocks the first snapshot until
/// the test releases it.
pub(crate) struct FakeOperator {
    calls: Mutex<Vec<String>>,
    fail_vms: Mutex<HashSet<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    inventory: Mutex<Vec<VmRecord>>,
}

impl FakeOperator {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_vms: Mutex::new(HashSet::new()),
            gate: Mutex::new(None),
            inventory: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn snapshot_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn fail_vm(&self, moid: &str) {
        self.fail_vms.lock().unwrap().insert(moid.to_string());
    }

    /// Install a gate; the next snapshot call blocks until the returned
    /// notify fires.
    pub(crate) fn hold_next_snapshot(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    pub(crate) fn set_inventory(&self, vms: Vec<VmRecord>) {
        *self.inventory.lock().unwrap() = vms;
    }
}

#[async_trait]
impl VmOperator for FakeOperator {
    async fn create_snapshot(&self, req: CreateSnapshotRequest) -> Result<(), WorkError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.calls.lock().unwrap().push(req.vm_moid.clone());
        if self.fail_vms.lock().unwrap().contains(&req.vm_moid) {
            return Err(WorkError::External(format!(
                "snapshot failed on {}",
                req.vm_moid
            )));
        }
        Ok(())
    }

    async fn fetch_inventory(&self) -> Result<InventoryPayload, WorkError> {
        let vms = self.inventory.lock().unwrap().clone();
        let data = serde_json::to_vec(&serde_json::json!({ "vms": vms }))
            .map_err(|err| WorkError::External(err.to_string()))?;
        Ok(InventoryPayload { data, vms })
    }
}

/// Fake connector handing out a shared operator. Can be set to fail or
/// to block until released.
pub(crate) struct FakeConnector {
    operator: Arc<FakeOperator>,
    fail: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub(crate) fn new(operator: Arc<FakeOperator>) -> Self {
        Self {
            operator,
            fail: Mutex::new(None),
            gate: Mutex::new(None),
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.fail.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn clear_fail(&self) {
        *self.fail.lock().unwrap() = None;
    }

    pub(crate) fn hold_next_connect(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _creds: &Credentials) -> Result<Arc<dyn VmOperator>, WorkError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(message) = self.fail.lock().unwrap().clone() {
            return Err(WorkError::External(message));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.operator) as Arc<dyn VmOperator>)
    }
}

pub(crate) fn vm_record(id: &str, name: &str) -> VmRecord {
    VmRecord {
        id: id.into(),
        name: name.into(),
        cluster: None,
        datacenter: None,
        cpus: 2,
        memory_mb: 2048.0,
        disk_mb: 10240.0,
        power_state: "POWERED_ON".into(),
        template: false,
    }
}

/// Poll `predicate` until it holds, or panic after five seconds.
pub(crate) async fn wait_until<F, Fut>(predicate: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if predicate().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
