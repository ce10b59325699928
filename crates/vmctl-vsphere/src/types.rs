//! Shared types: connection config, vSphere wire DTOs and the normalised
//! host / VM records handed back to callers.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{VmwareError, VmwareResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection / Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for connecting to a vCenter / ESXi endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsphereConfig {
    /// vCenter or ESXi hostname / IP (e.g. "vcenter.lab.local"), or a full
    /// base URL such as "https://vcenter.lab.local:8443"
    pub host: String,
    /// Port (default 443), ignored when `host` is a full URL
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username (e.g. "administrator@vsphere.local")
    pub username: String,
    pub password: SecretString,
    /// Skip TLS certificate verification (self-signed labs). Off by default.
    #[serde(default)]
    pub insecure: bool,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Port reported as a host's `managementPort`
    #[serde(default = "default_port")]
    pub host_management_port: u16,
}

fn default_port() -> u16 { 443 }
fn default_timeout() -> u64 { 30 }

impl VsphereConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            password: SecretString::new(password.into()),
            insecure: false,
            timeout_secs: default_timeout(),
            host_management_port: default_port(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Accept any server certificate. Only for lab endpoints with
    /// self-signed certificates.
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_host_management_port(mut self, port: u16) -> Self {
        self.host_management_port = port;
        self
    }

    /// Parse a camelCase JSON config document.
    pub fn from_json(json: &str) -> VmwareResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| VmwareError::connection(format!("Invalid vSphere config: {e}")).with_source(e))
    }

    /// Base URL for API calls, without a trailing slash.
    pub fn base_url(&self) -> VmwareResult<String> {
        let raw = if self.host.contains("://") {
            self.host.clone()
        } else if self.host.parse::<std::net::Ipv6Addr>().is_ok() {
            format!("https://[{}]:{}", self.host, self.port)
        } else {
            format!("https://{}:{}", self.host, self.port)
        };
        let parsed = url::Url::parse(&raw).map_err(|e| {
            VmwareError::connection(format!("Invalid vSphere endpoint '{}': {e}", self.host))
                .with_source(e)
        })?;
        Ok(parsed.as_str().trim_end_matches('/').to_string())
    }

    pub(crate) fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Copy of the config without the password.
    pub fn safe(&self) -> VsphereConfigSafe {
        VsphereConfigSafe {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            insecure: self.insecure,
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Config without the password, safe to print or serialise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsphereConfigSafe {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub insecure: bool,
    pub timeout_secs: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Power states
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// Read from the wire as "POWERED_ON", written to callers as "poweredOn".

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all(serialize = "camelCase", deserialize = "SCREAMING_SNAKE_CASE"))]
pub enum VmPowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all(serialize = "camelCase", deserialize = "SCREAMING_SNAKE_CASE"))]
pub enum HostPowerState {
    PoweredOn,
    PoweredOff,
    Standby,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Action for `POST /api/vcenter/vm/{vm}/power?action=...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
    Reset,
    Suspend,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reset => "reset",
            Self::Suspend => "suspend",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Wire types (vSphere Automation REST)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Entry of `GET /api/vcenter/host`.
#[derive(Debug, Clone, Deserialize)]
pub struct HostSummary {
    pub host: String,
    pub name: String,
    #[serde(default)]
    pub connection_state: Option<String>,
    #[serde(default)]
    pub power_state: Option<HostPowerState>,
}

/// Entry of `GET /api/vcenter/vm`.
#[derive(Debug, Clone, Deserialize)]
pub struct VmSummary {
    /// vSphere managed-object ID (e.g. "vm-42")
    pub vm: String,
    pub name: String,
    #[serde(default)]
    pub power_state: VmPowerState,
    #[serde(default)]
    pub cpu_count: Option<u32>,
    #[serde(default, rename = "memory_size_MiB")]
    pub memory_size_mib: Option<u64>,
}

/// Subset of `GET /api/vcenter/vm/{vm}` used here.
#[derive(Debug, Clone, Deserialize)]
pub struct VmInfo {
    pub name: String,
    #[serde(default)]
    pub power_state: VmPowerState,
    #[serde(default)]
    pub identity: Option<VmIdentity>,
    #[serde(default)]
    pub cpu: Option<VmCpu>,
    #[serde(default)]
    pub memory: Option<VmMemory>,
    #[serde(default)]
    pub template: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmIdentity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bios_uuid: Option<String>,
    #[serde(default)]
    pub instance_uuid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmCpu {
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmMemory {
    #[serde(default, rename = "size_MiB")]
    pub size_mib: Option<u64>,
}

/// `GET /api/vcenter/vm/{vm}/guest/identity`.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestIdentity {
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// Entry of `GET /api/vcenter/vm/{vm}/snapshots`.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSummary {
    pub snapshot: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
}

/// Body of `POST /api/vcenter/vm/{vm}/snapshots`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSnapshotSpec {
    pub name: String,
    pub description: String,
    /// Snapshot the VM's memory state
    pub memory: bool,
    /// Quiesce the guest file system
    pub quiesce: bool,
}

/// Body of `POST /api/vcenter/vm?action=clone`.
#[derive(Debug, Clone, Serialize)]
pub struct VmCloneSpec {
    pub name: String,
    /// Managed-object ID of the source VM / template
    pub source: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalised host snapshot, built per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub name: String,
    pub power_state: HostPowerState,
    pub management_port: u16,
}

impl HostRecord {
    pub fn from_summary(summary: HostSummary, management_port: u16) -> Self {
        Self {
            name: summary.name,
            power_state: summary.power_state.unwrap_or_default(),
            management_port,
        }
    }
}

/// Normalised VM snapshot, built per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmRecord {
    pub name: String,
    pub power_state: VmPowerState,
    pub instance_id: String,
    #[serde(rename = "memoryMB")]
    pub memory_mb: u64,
    pub cpu_count: u32,
    /// Empty when the guest reports no address
    pub primary_address: String,
    pub is_template: bool,
}

impl VmRecord {
    /// Merge the list entry, the detailed info and the guest address into
    /// one record. `summary` fills counters the info leaves out.
    pub fn assemble(
        instance_id: String,
        summary: Option<&VmSummary>,
        info: &VmInfo,
        primary_address: Option<String>,
    ) -> Self {
        let cpu_count = info
            .cpu
            .as_ref()
            .and_then(|c| c.count)
            .or(summary.and_then(|s| s.cpu_count))
            .unwrap_or(0);
        let memory_mb = info
            .memory
            .as_ref()
            .and_then(|m| m.size_mib)
            .or(summary.and_then(|s| s.memory_size_mib))
            .unwrap_or(0);

        Self {
            name: info.name.clone(),
            power_state: info.power_state,
            instance_id,
            memory_mb,
            cpu_count,
            primary_address: primary_address.unwrap_or_default(),
            is_template: info.template.unwrap_or(false),
        }
    }
}

/// How a new VM should be provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmSource {
    /// Full clone of an existing VM or template, by instance id
    Clone { source_instance_id: String },
    /// Deploy from an OVF / content-library image
    Image { library_item_id: String },
}

/// Serialise records to the stable JSON output form.
pub fn records_to_json<T: Serialize>(records: &[T]) -> VmwareResult<String> {
    Ok(serde_json::to_string(records)?)
}

pub fn record_to_json<T: Serialize>(record: &T) -> VmwareResult<String> {
    Ok(serde_json::to_string(record)?)
}
