//! VM inventory and lifecycle calls via the vSphere REST API.
//!
//! VMs are addressed by instance id (the BIOS UUID) from the outside; this
//! module maps that onto vSphere managed-object IDs (`vm-42`) by scanning
//! the inventory.

use crate::error::{VmwareError, VmwareErrorKind, VmwareResult};
use crate::types::*;
use crate::vsphere::VsphereClient;

use uuid::Uuid;

/// A VM whose instance id has been mapped to its managed-object ID.
#[derive(Debug, Clone)]
pub struct ResolvedVm {
    pub instance_id: String,
    pub summary: VmSummary,
    pub info: VmInfo,
}

impl ResolvedVm {
    /// vSphere managed-object ID.
    pub fn moid(&self) -> &str {
        &self.summary.vm
    }
}

/// High-level VM operations backed by `VsphereClient`.
pub struct VmManager<'a> {
    client: &'a VsphereClient,
}

impl<'a> VmManager<'a> {
    pub fn new(client: &'a VsphereClient) -> Self {
        Self { client }
    }

    // ── List / Get ──────────────────────────────────────────────────

    /// Raw VM list (managed-object IDs, names, power states).
    pub async fn list_summaries(&self) -> VmwareResult<Vec<VmSummary>> {
        self.client.get::<Vec<VmSummary>>("/api/vcenter/vm").await
    }

    /// Full details for a single VM.
    pub async fn get_info(&self, vm_id: &str) -> VmwareResult<VmInfo> {
        let path = format!("/api/vcenter/vm/{vm_id}");
        self.client.get::<VmInfo>(&path).await
    }

    /// Every VM that carries an instance id, fully detailed.
    ///
    /// VMs removed between the list call and their detail call are skipped.
    pub async fn list_resolved(&self) -> VmwareResult<Vec<ResolvedVm>> {
        let summaries = self.list_summaries().await?;
        let mut resolved = Vec::with_capacity(summaries.len());

        for summary in summaries {
            let info = match self.get_info(&summary.vm).await {
                Ok(info) => info,
                Err(e) if e.is_not_found() => {
                    log::debug!("VM {} vanished during listing", summary.vm);
                    continue;
                }
                Err(e) => return Err(e),
            };
            match instance_id_of(&info) {
                Some(instance_id) => resolved.push(ResolvedVm {
                    instance_id,
                    summary,
                    info,
                }),
                None => log::warn!("VM {} reports no BIOS UUID, skipping", summary.vm),
            }
        }

        Ok(resolved)
    }

    /// Map an instance id to its VM. `None` when nothing matches.
    pub async fn resolve(&self, instance_id: &str) -> VmwareResult<Option<ResolvedVm>> {
        let summaries = self.list_summaries().await?;
        for summary in summaries {
            let info = match self.get_info(&summary.vm).await {
                Ok(info) => info,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let matches = instance_id_of(&info).is_some_and(|id| same_instance(&id, instance_id));
            if matches {
                return Ok(Some(ResolvedVm {
                    instance_id: instance_id.to_string(),
                    summary,
                    info,
                }));
            }
        }

        log::debug!("No VM with instance id {instance_id}");
        Ok(None)
    }

    /// Best-effort guest IP address. Only asked for powered-on VMs; vCenter
    /// answers with an error while VMware Tools is not running, which is
    /// reported as `None`.
    pub async fn guest_address(
        &self,
        vm_id: &str,
        power_state: VmPowerState,
    ) -> VmwareResult<Option<String>> {
        if power_state != VmPowerState::PoweredOn {
            return Ok(None);
        }
        let path = format!("/api/vcenter/vm/{vm_id}/guest/identity");
        match self.client.get::<GuestIdentity>(&path).await {
            Ok(identity) => Ok(identity.ip_address.filter(|ip| !ip.is_empty())),
            Err(e) if matches!(e.kind, VmwareErrorKind::QueryError | VmwareErrorKind::NotFound) => {
                log::debug!("No guest identity for {vm_id}: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Build the caller-facing record for a resolved VM.
    pub async fn record(&self, vm: &ResolvedVm) -> VmwareResult<VmRecord> {
        let address = self.guest_address(vm.moid(), vm.info.power_state).await?;
        Ok(VmRecord::assemble(
            vm.instance_id.clone(),
            Some(&vm.summary),
            &vm.info,
            address,
        ))
    }

    /// Current power state.
    pub async fn get_power_state(&self, vm_id: &str) -> VmwareResult<VmPowerState> {
        #[derive(serde::Deserialize)]
        struct PowerInfo {
            state: VmPowerState,
        }
        let path = format!("/api/vcenter/vm/{vm_id}/power");
        let info: PowerInfo = self.client.get(&path).await?;
        Ok(info.state)
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Apply a power action. vCenter decides whether the transition is
    /// legal for the current state.
    pub async fn power(&self, vm_id: &str, action: PowerAction) -> VmwareResult<()> {
        let path = format!("/api/vcenter/vm/{vm_id}/power?action={}", action.as_str());
        self.client.post_empty(&path).await
    }

    /// Delete (unregister and remove from disk) a VM.
    pub async fn delete_vm(&self, vm_id: &str) -> VmwareResult<()> {
        let path = format!("/api/vcenter/vm/{vm_id}");
        self.client.delete(&path).await
    }

    /// Clone a VM or template. Returns the new managed-object ID.
    pub async fn clone_vm(&self, spec: &VmCloneSpec) -> VmwareResult<String> {
        let id: Option<String> = self
            .client
            .post("/api/vcenter/vm?action=clone", spec)
            .await?;
        id.filter(|id| !id.is_empty())
            .ok_or_else(|| VmwareError::operation("Clone accepted but no VM identifier was returned"))
    }
}

/// UUIDs compare by value (so hyphenation and case do not matter); anything
/// else compares case-insensitively as text.
fn same_instance(a: &str, b: &str) -> bool {
    match (Uuid::parse_str(a), Uuid::parse_str(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

pub(crate) fn instance_id_of(info: &VmInfo) -> Option<String> {
    info.identity
        .as_ref()
        .and_then(|i| i.bios_uuid.clone())
        .filter(|id| !id.is_empty())
}
