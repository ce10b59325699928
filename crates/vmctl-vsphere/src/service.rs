//! Lifecycle façade over a single vSphere session.
//!
//! `LifecycleService` owns the `VsphereClient` for its whole lifetime and
//! exposes every host / VM / snapshot operation by instance id. All methods
//! take `&self`, so one service can be shared across tasks through
//! `LifecycleServiceState = Arc<LifecycleService>`.
//!
//! Result conventions:
//! - reads fail with `QueryError` on transport / remote failure and
//!   `NotFound` when the instance id does not resolve;
//! - mutations return `Ok(false)` when the instance id does not resolve
//!   (including a VM removed between lookup and request),
//!   `Ok(true)` once vCenter accepted the request, and `OperationError`
//!   (with the remote reason) when vCenter rejected it.

use crate::error::{VmwareError, VmwareResult};
use crate::host::HostManager;
use crate::snapshot::{removal_plan, SnapshotManager};
use crate::types::*;
use crate::vm::{instance_id_of, ResolvedVm, VmManager};
use crate::vsphere::VsphereClient;

use std::sync::Arc;

/// Shared handle to a connected service.
pub type LifecycleServiceState = Arc<LifecycleService>;

#[derive(Debug)]
pub struct LifecycleService {
    client: VsphereClient,
}

impl LifecycleService {
    /// Connect to a vCenter / ESXi endpoint.
    pub async fn connect(config: &VsphereConfig) -> VmwareResult<Self> {
        let client = VsphereClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Release the session. Dropping the service without calling this
    /// schedules a best-effort logout instead.
    pub async fn close(self) -> VmwareResult<()> {
        self.client.close().await
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Probe whether vCenter still honours the session.
    pub async fn check_session(&self) -> VmwareResult<bool> {
        self.client.check_session().await
    }

    /// Current config (without password).
    pub fn config(&self) -> VsphereConfigSafe {
        self.client.config().safe()
    }

    fn vms(&self) -> VmManager<'_> {
        VmManager::new(&self.client)
    }

    fn snapshots(&self) -> SnapshotManager<'_> {
        SnapshotManager::new(&self.client)
    }

    // ── Hosts ───────────────────────────────────────────────────────

    pub async fn list_hosts(&self) -> VmwareResult<Vec<HostRecord>> {
        HostManager::new(&self.client).list_records().await
    }

    // ── VM reads ────────────────────────────────────────────────────

    pub async fn list_vms(&self) -> VmwareResult<Vec<VmRecord>> {
        let vms = self.vms();
        let resolved = vms.list_resolved().await?;
        let mut records = Vec::with_capacity(resolved.len());
        for vm in &resolved {
            records.push(vms.record(vm).await?);
        }
        Ok(records)
    }

    pub async fn get_vm(&self, instance_id: &str) -> VmwareResult<VmRecord> {
        let vm = self.require_vm(instance_id).await?;
        self.vms().record(&vm).await
    }

    pub async fn get_power_state(&self, instance_id: &str) -> VmwareResult<VmPowerState> {
        let vm = self.require_vm(instance_id).await?;
        self.vms().get_power_state(vm.moid()).await
    }

    /// Snapshot names on a VM, in vCenter's order.
    pub async fn list_snapshots(&self, instance_id: &str) -> VmwareResult<Vec<String>> {
        let vm = self.require_vm(instance_id).await?;
        let snaps = self.snapshots().list_snapshots(vm.moid()).await?;
        Ok(snaps.into_iter().filter_map(|s| s.name).collect())
    }

    // ── Provisioning ────────────────────────────────────────────────

    /// Provision a new VM named `name`. Cloning from an existing VM or
    /// template is supported; image deployment is not.
    pub async fn create_vm(&self, name: &str, source: &VmSource) -> VmwareResult<VmRecord> {
        let source_instance_id = match source {
            VmSource::Clone { source_instance_id } => source_instance_id,
            VmSource::Image { library_item_id } => {
                return Err(VmwareError::not_implemented(format!(
                    "Deploying '{name}' from image {library_item_id} is not supported"
                )));
            }
        };

        let vms = self.vms();
        let source_vm = vms.resolve(source_instance_id).await?.ok_or_else(|| {
            VmwareError::not_found(format!("Clone source {source_instance_id} not found"))
        })?;

        let spec = VmCloneSpec {
            name: name.to_string(),
            source: source_vm.moid().to_string(),
        };
        let new_id = vms
            .clone_vm(&spec)
            .await
            .map_err(VmwareError::into_operation)?;
        log::info!("Cloned {} into '{}' ({})", source_vm.moid(), name, new_id);

        let info = vms.get_info(&new_id).await?;
        let instance_id = instance_id_of(&info)
            .ok_or_else(|| VmwareError::query(format!("Cloned VM {new_id} reports no BIOS UUID")))?;
        let address = vms.guest_address(&new_id, info.power_state).await?;
        Ok(VmRecord::assemble(instance_id, None, &info, address))
    }

    // ── Mutations ───────────────────────────────────────────────────

    pub async fn delete_vm(&self, instance_id: &str) -> VmwareResult<bool> {
        let Some(vm) = self.vms().resolve(instance_id).await? else {
            return Ok(false);
        };
        let deleted = accepted(self.vms().delete_vm(vm.moid()).await, instance_id)?;
        if deleted {
            log::info!("Deleted VM {} ({})", instance_id, vm.moid());
        }
        Ok(deleted)
    }

    pub async fn power_on(&self, instance_id: &str) -> VmwareResult<bool> {
        self.power(instance_id, PowerAction::Start).await
    }

    pub async fn power_off(&self, instance_id: &str) -> VmwareResult<bool> {
        self.power(instance_id, PowerAction::Stop).await
    }

    pub async fn reset(&self, instance_id: &str) -> VmwareResult<bool> {
        self.power(instance_id, PowerAction::Reset).await
    }

    pub async fn suspend(&self, instance_id: &str) -> VmwareResult<bool> {
        self.power(instance_id, PowerAction::Suspend).await
    }

    /// Resume a suspended VM. vSphere resumes through the same `start`
    /// action used to power on.
    pub async fn resume(&self, instance_id: &str) -> VmwareResult<bool> {
        self.power(instance_id, PowerAction::Start).await
    }

    async fn power(&self, instance_id: &str, action: PowerAction) -> VmwareResult<bool> {
        let Some(vm) = self.vms().resolve(instance_id).await? else {
            return Ok(false);
        };
        let done = accepted(self.vms().power(vm.moid(), action).await, instance_id)?;
        if done {
            log::info!("Power action '{}' accepted for {}", action.as_str(), instance_id);
        }
        Ok(done)
    }

    /// Snapshot memory and disks without quiescing the guest.
    pub async fn create_snapshot(
        &self,
        instance_id: &str,
        name: &str,
        description: &str,
    ) -> VmwareResult<bool> {
        let Some(vm) = self.vms().resolve(instance_id).await? else {
            return Ok(false);
        };
        accepted(
            self.snapshots()
                .create_snapshot(vm.moid(), name, description)
                .await,
            instance_id,
        )
    }

    /// Remove every snapshot named exactly `name`, children included.
    /// Fails with `NotFound` when the VM has no snapshot of that name.
    pub async fn remove_snapshot(&self, instance_id: &str, name: &str) -> VmwareResult<bool> {
        let Some(vm) = self.vms().resolve(instance_id).await? else {
            return Ok(false);
        };
        let snaps = self.snapshots();
        let plan = removal_plan(&snaps.list_snapshots(vm.moid()).await?, name);
        if plan.is_empty() {
            return Err(VmwareError::not_found(format!(
                "VM {instance_id} has no snapshot named '{name}'"
            )));
        }
        for snapshot_id in &plan {
            snaps
                .delete_snapshot(vm.moid(), snapshot_id)
                .await
                .map_err(VmwareError::into_operation)?;
        }
        log::info!("Removed {} snapshot(s) '{}' from {}", plan.len(), name, instance_id);
        Ok(true)
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn require_vm(&self, instance_id: &str) -> VmwareResult<ResolvedVm> {
        self.vms()
            .resolve(instance_id)
            .await?
            .ok_or_else(|| VmwareError::not_found(format!("VM {instance_id} not found")))
    }
}

/// Outcome of a mutation on a resolved VM. A 404 from the call itself means
/// the VM was removed after it resolved, which reads the same as an unknown
/// instance id.
fn accepted(result: VmwareResult<()>, instance_id: &str) -> VmwareResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            log::debug!("VM {instance_id} vanished before the request landed: {e}");
            Ok(false)
        }
        Err(e) => Err(e.into_operation()),
    }
}
