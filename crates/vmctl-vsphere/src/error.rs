//! Error types for the vSphere lifecycle crate.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

/// Categorised error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmwareErrorKind {
    /// Session could not be established, or the endpoint rejected it (401/403)
    ConnectionError,
    /// A read (list / get) failed in transport or on the remote side
    QueryError,
    /// Instance id or snapshot name does not resolve
    NotFound,
    /// A mutating request (power / delete / snapshot / clone) was rejected
    OperationError,
    /// Operation intentionally left unsupported
    NotImplemented,
    /// Per-request timeout elapsed
    Timeout,
}

type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Crate error type carrying a kind, a human-readable message, the reason
/// reported by vCenter (when there was one) and the underlying cause.
#[derive(Debug, Clone)]
pub struct VmwareError {
    pub kind: VmwareErrorKind,
    pub message: String,
    pub reason: Option<String>,
    source: Option<Cause>,
}

impl VmwareError {
    pub fn new(kind: VmwareErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            reason: None,
            source: None,
        }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::ConnectionError, msg)
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::QueryError, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::NotFound, msg)
    }

    pub fn operation(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::OperationError, msg)
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::NotImplemented, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(VmwareErrorKind::Timeout, msg)
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attach the reason reported by the remote endpoint.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Re-classify as a session establishment failure. The original error
    /// becomes the cause.
    pub fn into_connection(self, context: &str) -> Self {
        if self.kind == VmwareErrorKind::ConnectionError {
            return self;
        }
        let reason = self.reason.clone();
        let mut err = Self::connection(format!("{context}: {}", self.message)).with_source(self);
        err.reason = reason;
        err
    }

    /// Re-classify a read-path failure as a failed mutation. Not-found,
    /// connection and timeout kinds are left untouched.
    pub fn into_operation(mut self) -> Self {
        if self.kind == VmwareErrorKind::QueryError {
            self.kind = VmwareErrorKind::OperationError;
        }
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == VmwareErrorKind::NotFound
    }

    /// Whether a caller may reasonably retry. Nothing in this crate retries
    /// on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            VmwareErrorKind::QueryError | VmwareErrorKind::Timeout
        )
    }

    /// Build an error from a non-success HTTP status and the response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let reason = remote_reason(body);
        let detail = reason.clone().unwrap_or_else(|| truncate(body, 500).to_string());
        let mut err = match status {
            401 => Self::connection(format!("Session expired or invalid (401): {detail}")),
            403 => Self::connection(format!("Access denied (403): {detail}")),
            404 => Self::not_found(format!("Resource not found: {detail}")),
            _ => Self::query(format!("API error {status}: {detail}")),
        };
        err.reason = reason;
        err
    }
}

impl fmt::Display for VmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl StdError for VmwareError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<VmwareError> for String {
    fn from(e: VmwareError) -> String {
        e.to_string()
    }
}

impl From<reqwest::Error> for VmwareError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("HTTP timeout: {e}")).with_source(e)
        } else if e.is_connect() {
            Self::query(format!("Connection failed: {e}")).with_source(e)
        } else {
            Self::query(format!("HTTP error: {e}")).with_source(e)
        }
    }
}

impl From<serde_json::Error> for VmwareError {
    fn from(e: serde_json::Error) -> Self {
        Self::query(format!("JSON parse error: {e}")).with_source(e)
    }
}

/// Convenience alias.
pub type VmwareResult<T> = Result<T, VmwareError>;

// ── vSphere error bodies ────────────────────────────────────────────

#[derive(Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    messages: Vec<RemoteMessage>,
}

#[derive(Deserialize)]
struct RemoteMessage {
    #[serde(default)]
    default_message: Option<String>,
}

/// Extract `"<error_type>: <first default_message>"` from a vSphere
/// Automation API error body.
pub(crate) fn remote_reason(body: &str) -> Option<String> {
    let parsed: RemoteErrorBody = serde_json::from_str(body).ok()?;
    let message = parsed
        .messages
        .into_iter()
        .find_map(|m| m.default_message)
        .filter(|m| !m.is_empty());

    match (parsed.error_type, message) {
        (Some(t), Some(m)) => Some(format!("{t}: {m}")),
        (Some(t), None) => Some(t),
        (None, Some(m)) => Some(m),
        (None, None) => None,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
