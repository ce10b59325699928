//! ESXi host inventory via the vSphere REST API.

use crate::error::VmwareResult;
use crate::types::*;
use crate::vsphere::VsphereClient;

/// ESXi host operations.
pub struct HostManager<'a> {
    client: &'a VsphereClient,
}

impl<'a> HostManager<'a> {
    pub fn new(client: &'a VsphereClient) -> Self {
        Self { client }
    }

    /// List all ESXi hosts.
    pub async fn list_hosts(&self) -> VmwareResult<Vec<HostSummary>> {
        self.client
            .get::<Vec<HostSummary>>("/api/vcenter/host")
            .await
    }

    /// List hosts as caller-facing records.
    pub async fn list_records(&self) -> VmwareResult<Vec<HostRecord>> {
        let port = self.client.config().host_management_port;
        let hosts = self.list_hosts().await?;
        Ok(hosts
            .into_iter()
            .map(|h| HostRecord::from_summary(h, port))
            .collect())
    }
}
