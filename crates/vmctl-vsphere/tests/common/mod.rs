//! In-process fake vCenter speaking the subset of the vSphere Automation
//! REST API the client uses. Plain HTTP on 127.0.0.1, in-memory inventory.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use vmctl_vsphere::VsphereConfig;

pub const USER: &str = "administrator@vsphere.local";
pub const PASSWORD: &str = "Lab-Passw0rd!";

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Inventory ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FakeHost {
    pub moid: String,
    pub name: String,
    pub power_state: &'static str,
}

#[derive(Debug, Clone)]
pub struct FakeSnapshot {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FakeVm {
    pub moid: String,
    pub name: String,
    pub bios_uuid: String,
    pub power_state: &'static str,
    pub cpu_count: u32,
    pub memory_mib: u64,
    pub ip_address: Option<String>,
    pub template: bool,
    pub snapshots: Vec<FakeSnapshot>,
}

impl FakeVm {
    pub fn new(moid: &str, name: &str, bios_uuid: &str) -> Self {
        Self {
            moid: moid.into(),
            name: name.into(),
            bios_uuid: bios_uuid.into(),
            power_state: "POWERED_OFF",
            cpu_count: 2,
            memory_mib: 4096,
            ip_address: None,
            template: false,
            snapshots: Vec::new(),
        }
    }

    pub fn powered_on(mut self) -> Self {
        self.power_state = "POWERED_ON";
        self
    }

    pub fn suspended(mut self) -> Self {
        self.power_state = "SUSPENDED";
        self
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn as_template(mut self) -> Self {
        self.template = true;
        self
    }

    pub fn with_snapshot(mut self, id: &str, name: &str, parent: Option<&str>) -> Self {
        self.snapshots.push(FakeSnapshot {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            parent: parent.map(Into::into),
        });
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub hosts: Vec<FakeHost>,
    pub vms: Vec<FakeVm>,
    pub sessions: HashSet<String>,
    pub logins: usize,
    pub logouts: usize,
    pub next_id: u32,
    /// Answer `GET /api/vcenter/vm` with a 500
    pub fail_vm_list: bool,
    /// Delay every `GET /api/vcenter/vm` by this much
    pub vm_list_delay: Option<Duration>,
    /// Remove the target VM right before a power / delete / snapshot-create
    /// call is served, as if another client deleted it concurrently
    pub vanish_before_mutation: bool,
}

impl FakeState {
    pub fn with_host(mut self, moid: &str, name: &str, power_state: &'static str) -> Self {
        self.hosts.push(FakeHost {
            moid: moid.into(),
            name: name.into(),
            power_state,
        });
        self
    }

    pub fn with_vm(mut self, vm: FakeVm) -> Self {
        self.vms.push(vm);
        self
    }

    pub fn vm(&self, moid: &str) -> Option<&FakeVm> {
        self.vms.iter().find(|v| v.moid == moid)
    }

    fn vm_mut(&mut self, moid: &str) -> Option<&mut FakeVm> {
        self.vms.iter_mut().find(|v| v.moid == moid)
    }

    /// Apply `vanish_before_mutation` for `moid`. True when the VM is gone.
    fn vanish(&mut self, moid: &str) -> bool {
        if self.vanish_before_mutation {
            self.vms.retain(|v| v.moid != moid);
        }
        self.vm(moid).is_none()
    }

    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", 1000 + self.next_id)
    }
}

type Shared = Arc<Mutex<FakeState>>;

// ── Server ──────────────────────────────────────────────────────────

pub struct FakeVcenter {
    pub addr: SocketAddr,
    state: Shared,
    handle: JoinHandle<()>,
}

impl FakeVcenter {
    pub async fn start(seed: FakeState) -> Self {
        let state: Shared = Arc::new(Mutex::new(seed));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn config(&self) -> VsphereConfig {
        VsphereConfig::new(format!("http://{}", self.addr), USER, PASSWORD)
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Wait up to a second for `pred` to hold.
    pub async fn eventually(&self, pred: impl Fn(&FakeState) -> bool) -> bool {
        for _ in 0..50 {
            if pred(&self.state()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for FakeVcenter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/session", post(login).get(check_session).delete(logout))
        .route("/api/vcenter/host", get(list_hosts))
        .route("/api/vcenter/vm", get(list_vms).post(vm_collection_action))
        .route("/api/vcenter/vm/:vm", get(get_vm).delete(delete_vm))
        .route("/api/vcenter/vm/:vm/power", get(get_power).post(power_action))
        .route("/api/vcenter/vm/:vm/guest/identity", get(guest_identity))
        .route("/api/vcenter/vm/:vm/snapshots", get(list_snapshots).post(create_snapshot))
        .route("/api/vcenter/vm/:vm/snapshots/:snapshot", delete(delete_snapshot))
        .layer(middleware::from_fn_with_state(state.clone(), require_session))
        .with_state(state)
}

fn vapi_error(status: StatusCode, error_type: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error_type": error_type,
            "messages": [{ "args": [], "default_message": message, "id": "fake.vcenter" }],
        })),
    )
        .into_response()
}

fn vm_not_found(moid: &str) -> Response {
    vapi_error(
        StatusCode::NOT_FOUND,
        "NOT_FOUND",
        &format!("Virtual machine with identifier '{moid}' does not exist."),
    )
}

/// Everything except creating a session needs a live session id.
async fn require_session(State(state): State<Shared>, req: Request, next: Next) -> Response {
    tracing::debug!(method = %req.method(), uri = %req.uri(), "fake vcenter request");
    if req.method() == Method::POST && req.uri().path() == "/api/session" {
        return next.run(req).await;
    }
    let valid = req
        .headers()
        .get("vmware-api-session-id")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|sid| state.lock().unwrap().sessions.contains(sid));
    if !valid {
        return vapi_error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "Authentication required.");
    }
    next.run(req).await
}

// ── Session ─────────────────────────────────────────────────────────

async fn login(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let expected = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{USER}:{PASSWORD}"))
    );
    let supplied = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if supplied != expected {
        return vapi_error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "Authentication required.");
    }

    let mut st = state.lock().unwrap();
    st.logins += 1;
    let sid = format!("session-{:08x}", st.logins * 7919);
    st.sessions.insert(sid.clone());
    (StatusCode::CREATED, Json(json!(sid))).into_response()
}

async fn logout(State(state): State<Shared>, headers: HeaderMap) -> StatusCode {
    let mut st = state.lock().unwrap();
    if let Some(sid) = headers.get("vmware-api-session-id").and_then(|v| v.to_str().ok()) {
        st.sessions.remove(sid);
    }
    st.logouts += 1;
    StatusCode::NO_CONTENT
}

async fn check_session() -> Json<Value> {
    Json(json!({ "user": USER }))
}

// ── Hosts / VMs ─────────────────────────────────────────────────────

async fn list_hosts(State(state): State<Shared>) -> Json<Value> {
    let st = state.lock().unwrap();
    let hosts: Vec<Value> = st
        .hosts
        .iter()
        .map(|h| {
            json!({
                "host": h.moid,
                "name": h.name,
                "connection_state": "CONNECTED",
                "power_state": h.power_state,
            })
        })
        .collect();
    Json(Value::Array(hosts))
}

async fn list_vms(State(state): State<Shared>) -> Response {
    let (fail, delay) = {
        let st = state.lock().unwrap();
        (st.fail_vm_list, st.vm_list_delay)
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if fail {
        return vapi_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SERVICE_UNAVAILABLE",
            "Inventory service is unavailable.",
        );
    }

    let st = state.lock().unwrap();
    let vms: Vec<Value> = st
        .vms
        .iter()
        .map(|v| {
            json!({
                "vm": v.moid,
                "name": v.name,
                "power_state": v.power_state,
                "cpu_count": v.cpu_count,
                "memory_size_MiB": v.memory_mib,
            })
        })
        .collect();
    Json(Value::Array(vms)).into_response()
}

async fn get_vm(State(state): State<Shared>, Path(moid): Path<String>) -> Response {
    let st = state.lock().unwrap();
    let Some(v) = st.vm(&moid) else {
        return vm_not_found(&moid);
    };
    Json(json!({
        "name": v.name,
        "power_state": v.power_state,
        "identity": {
            "name": v.name,
            "bios_uuid": v.bios_uuid,
            "instance_uuid": format!("50{}", v.moid),
        },
        "cpu": { "count": v.cpu_count, "cores_per_socket": 1 },
        "memory": { "size_MiB": v.memory_mib },
        "template": v.template,
        "guest_OS": "UBUNTU_64",
    }))
    .into_response()
}

async fn delete_vm(State(state): State<Shared>, Path(moid): Path<String>) -> Response {
    let mut st = state.lock().unwrap();
    if st.vanish(&moid) {
        return vm_not_found(&moid);
    }
    let Some(v) = st.vm(&moid) else {
        return vm_not_found(&moid);
    };
    if v.power_state == "POWERED_ON" {
        return vapi_error(
            StatusCode::BAD_REQUEST,
            "RESOURCE_IN_USE",
            "The virtual machine is powered on and cannot be deleted.",
        );
    }
    st.vms.retain(|v| v.moid != moid);
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct ActionQuery {
    action: Option<String>,
}

#[derive(Deserialize)]
struct CloneBody {
    name: String,
    source: String,
}

async fn vm_collection_action(
    State(state): State<Shared>,
    Query(q): Query<ActionQuery>,
    Json(body): Json<CloneBody>,
) -> Response {
    if q.action.as_deref() != Some("clone") {
        return vapi_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", "Unsupported action.");
    }
    let mut st = state.lock().unwrap();
    let Some(source) = st.vm(&body.source).cloned() else {
        return vm_not_found(&body.source);
    };
    let moid = st.next("vm");
    let clone = FakeVm {
        moid: moid.clone(),
        name: body.name,
        bios_uuid: uuid::Uuid::new_v4().to_string(),
        power_state: "POWERED_OFF",
        ip_address: None,
        template: false,
        snapshots: Vec::new(),
        ..source
    };
    st.vms.push(clone);
    Json(json!(moid)).into_response()
}

async fn get_power(State(state): State<Shared>, Path(moid): Path<String>) -> Response {
    let st = state.lock().unwrap();
    match st.vm(&moid) {
        Some(v) => Json(json!({ "state": v.power_state })).into_response(),
        None => vm_not_found(&moid),
    }
}

/// Transitions follow vCenter: redundant start/stop is rejected with
/// ALREADY_IN_DESIRED_STATE, reset/suspend need a running VM.
async fn power_action(
    State(state): State<Shared>,
    Path(moid): Path<String>,
    Query(q): Query<ActionQuery>,
) -> Response {
    let mut st = state.lock().unwrap();
    if st.vanish(&moid) {
        return vm_not_found(&moid);
    }
    let Some(v) = st.vm_mut(&moid) else {
        return vm_not_found(&moid);
    };

    let next = match (q.action.as_deref(), v.power_state) {
        (Some("start"), "POWERED_ON") | (Some("stop"), "POWERED_OFF") => {
            return vapi_error(
                StatusCode::BAD_REQUEST,
                "ALREADY_IN_DESIRED_STATE",
                "Virtual machine is already in the requested power state.",
            );
        }
        (Some("start"), _) => "POWERED_ON",
        (Some("stop"), _) => "POWERED_OFF",
        (Some("reset"), "POWERED_ON") => "POWERED_ON",
        (Some("suspend"), "POWERED_ON") => "SUSPENDED",
        (Some("reset" | "suspend"), _) => {
            return vapi_error(
                StatusCode::BAD_REQUEST,
                "NOT_ALLOWED_IN_CURRENT_STATE",
                "The operation is not allowed in the current power state.",
            );
        }
        _ => return vapi_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", "Unknown action."),
    };
    v.power_state = next;
    StatusCode::NO_CONTENT.into_response()
}

async fn guest_identity(State(state): State<Shared>, Path(moid): Path<String>) -> Response {
    let st = state.lock().unwrap();
    let Some(v) = st.vm(&moid) else {
        return vm_not_found(&moid);
    };
    match (&v.ip_address, v.power_state) {
        (Some(ip), "POWERED_ON") => Json(json!({
            "name": "UBUNTU_64",
            "family": "LINUX",
            "full_name": { "default_message": "Ubuntu Linux (64-bit)" },
            "host_name": v.name,
            "ip_address": ip,
        }))
        .into_response(),
        _ => vapi_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "VMware Tools is not running in the guest.",
        ),
    }
}

// ── Snapshots ───────────────────────────────────────────────────────

async fn list_snapshots(State(state): State<Shared>, Path(moid): Path<String>) -> Response {
    let st = state.lock().unwrap();
    let Some(v) = st.vm(&moid) else {
        return vm_not_found(&moid);
    };
    let snaps: Vec<Value> = v
        .snapshots
        .iter()
        .map(|s| {
            json!({
                "snapshot": s.id,
                "name": s.name,
                "description": s.description,
                "parent": s.parent,
            })
        })
        .collect();
    Json(Value::Array(snaps)).into_response()
}

#[derive(Deserialize)]
struct SnapshotBody {
    name: String,
    description: String,
    memory: bool,
    quiesce: bool,
}

async fn create_snapshot(
    State(state): State<Shared>,
    Path(moid): Path<String>,
    Json(body): Json<SnapshotBody>,
) -> Response {
    let mut st = state.lock().unwrap();
    if st.vanish(&moid) {
        return vm_not_found(&moid);
    }
    // The client always asks for memory, never for quiescing
    if !body.memory || body.quiesce {
        return vapi_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", "Unexpected snapshot options.");
    }
    let id = st.next("snapshot");
    let v = st.vm_mut(&moid).expect("checked above");
    let parent = v.snapshots.last().map(|s| s.id.clone());
    v.snapshots.push(FakeSnapshot {
        id: id.clone(),
        name: body.name,
        description: body.description,
        parent,
    });
    (StatusCode::CREATED, Json(json!(id))).into_response()
}

#[derive(Deserialize)]
struct RemoveQuery {
    #[serde(default)]
    remove_children: bool,
}

async fn delete_snapshot(
    State(state): State<Shared>,
    Path((moid, snapshot)): Path<(String, String)>,
    Query(q): Query<RemoveQuery>,
) -> Response {
    let mut st = state.lock().unwrap();
    let Some(v) = st.vm_mut(&moid) else {
        return vm_not_found(&moid);
    };
    if !v.snapshots.iter().any(|s| s.id == snapshot) {
        return vapi_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Snapshot does not exist.");
    }

    let mut doomed: HashSet<String> = HashSet::from([snapshot]);
    if q.remove_children {
        loop {
            let more: Vec<String> = v
                .snapshots
                .iter()
                .filter(|s| !doomed.contains(&s.id))
                .filter(|s| s.parent.as_ref().is_some_and(|p| doomed.contains(p)))
                .map(|s| s.id.clone())
                .collect();
            if more.is_empty() {
                break;
            }
            doomed.extend(more);
        }
    }
    v.snapshots.retain(|s| !doomed.contains(&s.id));
    StatusCode::NO_CONTENT.into_response()
}
