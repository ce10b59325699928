//! # vmctl – VMware / vSphere VM lifecycle client
//!
//! A thin client for vCenter / ESXi over the vSphere Automation REST API:
//! one authenticated session, and host / VM / snapshot lifecycle calls that
//! address VMs by instance id (BIOS UUID).
//!
//! ## Modules
//!
//! - **types**: Config, vSphere wire types, host / VM records
//! - **error**: Crate-specific error types
//! - **vsphere**: REST client owning the session (connect once, release once)
//! - **vm**: VM listing, instance-id resolution, power, delete, clone
//! - **snapshot**: Snapshot list / create / delete
//! - **host**: ESXi host listing
//! - **service**: Lifecycle façade used by callers

pub mod types;
pub mod error;
pub mod vsphere;
pub mod vm;
pub mod snapshot;
pub mod host;
pub mod service;

pub use error::{VmwareError, VmwareErrorKind, VmwareResult};
pub use service::{LifecycleService, LifecycleServiceState};
pub use types::{
    record_to_json, records_to_json, HostPowerState, HostRecord, VmPowerState, VmRecord,
    VmSource, VsphereConfig, VsphereConfigSafe,
};
