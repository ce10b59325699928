//! VM snapshot management via the vSphere REST API.

use crate::error::VmwareResult;
use crate::types::*;
use crate::vsphere::VsphereClient;

use std::collections::{HashMap, HashSet};

/// Snapshot operations on a VM, addressed by managed-object ID.
pub struct SnapshotManager<'a> {
    client: &'a VsphereClient,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(client: &'a VsphereClient) -> Self {
        Self { client }
    }

    /// List all snapshots for a VM as a flat list.
    pub async fn list_snapshots(&self, vm_id: &str) -> VmwareResult<Vec<SnapshotSummary>> {
        let path = format!("/api/vcenter/vm/{vm_id}/snapshots");
        // 404 on an existing VM means it has no snapshots
        match self.client.get::<Vec<SnapshotSummary>>(&path).await {
            Ok(snaps) => Ok(snaps),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Create a snapshot including memory, without quiescing the guest.
    pub async fn create_snapshot(
        &self,
        vm_id: &str,
        name: &str,
        description: &str,
    ) -> VmwareResult<()> {
        let spec = CreateSnapshotSpec {
            name: name.to_string(),
            description: description.to_string(),
            memory: true,
            quiesce: false,
        };
        let path = format!("/api/vcenter/vm/{vm_id}/snapshots");
        let _: serde_json::Value = self.client.post(&path, &spec).await?;
        Ok(())
    }

    /// Delete a snapshot together with its children.
    pub async fn delete_snapshot(&self, vm_id: &str, snapshot_id: &str) -> VmwareResult<()> {
        let path = format!("/api/vcenter/vm/{vm_id}/snapshots/{snapshot_id}?remove_children=true");
        self.client.delete(&path).await
    }
}

/// Snapshot IDs to delete so that every snapshot named exactly `name` is
/// gone. A match whose ancestor also matches is left out, since deleting
/// the ancestor removes it already. Order follows `snapshots`.
pub fn removal_plan(snapshots: &[SnapshotSummary], name: &str) -> Vec<String> {
    let matching: HashSet<&str> = snapshots
        .iter()
        .filter(|s| s.name.as_deref() == Some(name))
        .map(|s| s.snapshot.as_str())
        .collect();
    let parents: HashMap<&str, &str> = snapshots
        .iter()
        .filter_map(|s| s.parent.as_deref().map(|p| (s.snapshot.as_str(), p)))
        .collect();

    snapshots
        .iter()
        .filter(|s| matching.contains(s.snapshot.as_str()))
        .filter(|s| {
            let mut seen = HashSet::new();
            let mut cursor = parents.get(s.snapshot.as_str()).copied();
            while let Some(p) = cursor {
                if matching.contains(p) {
                    return false;
                }
                if !seen.insert(p) {
                    break;
                }
                cursor = parents.get(p).copied();
            }
            true
        })
        .map(|s| s.snapshot.clone())
        .collect()
}
