//! vSphere REST API HTTP client with session-based authentication.
//!
//! Communicates with vCenter / ESXi via `https://{host}/api/...`. A client
//! only exists in the logged-in state: [`VsphereClient::connect`] creates
//! the session and [`VsphereClient::close`] (or `Drop`) releases it, once.

use crate::error::{VmwareError, VmwareResult};
use crate::types::VsphereConfig;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

const SESSION_HEADER: &str = "vmware-api-session-id";

/// Authenticated vSphere REST API client.
pub struct VsphereClient {
    client: Client,
    base_url: String,
    session_id: Option<String>,
    config: VsphereConfig,
}

impl std::fmt::Debug for VsphereClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VsphereClient")
            .field("base_url", &self.base_url)
            .field("username", &self.config.username)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl VsphereClient {
    /// Build the HTTP client and log in. Either returns a ready client or
    /// a `ConnectionError` whose source is the underlying failure.
    pub async fn connect(config: &VsphereConfig) -> VmwareResult<Self> {
        let base_url = config.base_url()?;

        if config.insecure {
            log::warn!(
                "TLS certificate verification disabled for vSphere endpoint {}",
                base_url
            );
        }

        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                VmwareError::connection(format!("Failed to build HTTP client: {e}")).with_source(e)
            })?;

        let mut this = Self {
            client,
            base_url,
            session_id: None,
            config: config.clone(),
        };
        this.login().await?;
        log::info!(
            "Connected to vSphere endpoint {} as {}",
            this.base_url,
            this.config.username
        );
        Ok(this)
    }

    /// Base URL for API calls.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether we still hold a session.
    pub fn is_connected(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn config(&self) -> &VsphereConfig {
        &self.config
    }

    // ── Session management ──────────────────────────────────────────

    /// Create a new API session (POST /api/session).
    async fn login(&mut self) -> VmwareResult<()> {
        let url = format!("{}/api/session", self.base_url);

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.config.username, Some(self.config.password()))
            .send()
            .await
            .map_err(|e| VmwareError::from(e).into_connection("Login failed"))?;

        let resp = Self::check_status(resp)
            .await
            .map_err(|e| e.into_connection("Login failed"))?;

        // Session ID comes back as a quoted JSON string
        let session_id: String = Self::parse_response(resp)
            .await
            .map_err(|e| e.into_connection("Failed to parse session response"))?;

        self.session_id = Some(session_id);
        Ok(())
    }

    /// Delete the session (DELETE /api/session). Consumes the client so the
    /// session cannot be released twice.
    pub async fn close(mut self) -> VmwareResult<()> {
        let Some(sid) = self.session_id.take() else {
            return Ok(());
        };
        let url = format!("{}/api/session", self.base_url);
        let resp = self
            .client
            .delete(&url)
            .header(SESSION_HEADER, sid.as_str())
            .send()
            .await
            .map_err(|e| VmwareError::from(e).into_connection("Logout failed"))?;
        Self::check_status(resp)
            .await
            .map_err(|e| e.into_connection("Logout failed"))?;
        log::info!("Disconnected from vSphere endpoint {}", self.base_url);
        Ok(())
    }

    /// Check if the session is still valid (GET /api/session).
    pub async fn check_session(&self) -> VmwareResult<bool> {
        let resp = self.request(Method::GET, "/api/session")?.send().await?;
        Ok(resp.status().is_success())
    }

    // ── HTTP helpers ────────────────────────────────────────────────

    fn request(&self, method: Method, path: &str) -> VmwareResult<RequestBuilder> {
        let sid = self
            .session_id
            .as_deref()
            .ok_or_else(|| VmwareError::connection("Not logged in, no active session"))?;
        let url = format!("{}{}", self.base_url, path);
        log::debug!("{method} {path}");
        Ok(self.client.request(method, url).header(SESSION_HEADER, sid))
    }

    /// GET a JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> VmwareResult<T> {
        let resp = self.request(Method::GET, path)?.send().await?;
        let resp = Self::check_status(resp).await?;
        Self::parse_response(resp).await
    }

    /// POST with JSON body, return parsed response.
    pub async fn post<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> VmwareResult<T> {
        let resp = self.request(Method::POST, path)?.json(body).send().await?;
        let resp = Self::check_status(resp).await?;
        Self::parse_response(resp).await
    }

    /// POST with no body, discarding the response.
    pub async fn post_empty(&self, path: &str) -> VmwareResult<()> {
        let resp = self.request(Method::POST, path)?.send().await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    /// DELETE, ignoring response body.
    pub async fn delete(&self, path: &str) -> VmwareResult<()> {
        let resp = self.request(Method::DELETE, path)?.send().await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn check_status(resp: Response) -> VmwareResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(VmwareError::from_status(status.as_u16(), &body))
    }

    async fn parse_response<T: DeserializeOwned>(resp: Response) -> VmwareResult<T> {
        let text = resp.text().await?;

        if text.is_empty() {
            // Some vSphere endpoints return empty body for success
            return Ok(serde_json::from_str("null")?);
        }

        serde_json::from_str(&text).map_err(|e| {
            let head: String = text.chars().take(500).collect();
            VmwareError::query(format!("JSON parse error: {e}, body: {head}")).with_source(e)
        })
    }
}

impl Drop for VsphereClient {
    fn drop(&mut self) {
        let Some(sid) = self.session_id.take() else {
            return;
        };
        let url = format!("{}/api/session", self.base_url);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let client = self.client.clone();
                handle.spawn(async move {
                    if let Err(e) = client.delete(&url).header(SESSION_HEADER, sid).send().await {
                        log::warn!("Best-effort vSphere logout failed: {e}");
                    }
                });
            }
            Err(_) => log::warn!(
                "vSphere client for {} dropped outside a runtime; session left to expire",
                self.base_url
            ),
        }
    }
}
