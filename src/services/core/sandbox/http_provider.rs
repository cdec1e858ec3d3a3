// src/services/core/sandbox/http_provider.rs

//! Client for a remote sandbox API.
//!
//! Endpoints (relative to the configured base URL):
//! - `POST   /sandboxes`                      create, returns `{ "sandbox_id": .. }`
//! - `POST   /sandboxes/{id}/commands`        run a shell command
//! - `PUT    /sandboxes/{id}/files`           write a file
//! - `DELETE /sandboxes/{id}`                 destroy (404 counts as already gone)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::provider::{ExecOutput, SandboxExecError, SandboxHandle, SandboxProvider};
use crate::utils::{ChaosLabError, ChaosLabResult};

/// Lifetime requested for each sandbox; the API reaps it after this even if destroy never arrives
const SANDBOX_LIFETIME_SECONDS: u64 = 900;
/// Added on top of a command's own timeout for the HTTP round trip
const REQUEST_OVERHEAD: Duration = Duration::from_secs(10);
const CONTROL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct CreateSandboxResponse {
    sandbox_id: String,
    #[serde(default)]
    home_dir: Option<String>,
    #[serde(default)]
    app_port: Option<u16>,
}

pub struct HttpSandboxProvider {
    base_url: Url,
    api_key: SecretString,
    http_client: Client,
}

impl HttpSandboxProvider {
    pub fn new(base_url: Url, api_key: SecretString) -> Self {
        Self {
            base_url,
            api_key,
            http_client: Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> ChaosLabResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}/{}", base, path.trim_start_matches('/')))?)
    }

    fn unreachable(sandbox_id: &str, err: reqwest::Error) -> ChaosLabError {
        if err.is_timeout() {
            SandboxExecError::Timeout {
                sandbox_id: sandbox_id.to_string(),
                seconds: CONTROL_REQUEST_TIMEOUT.as_secs(),
            }
            .into()
        } else {
            SandboxExecError::Unreachable {
                sandbox_id: sandbox_id.to_string(),
                reason: err.to_string(),
            }
            .into()
        }
    }

    /// Maps non-success statuses: 5xx and 404 are transport-level, other 4xx are rejections.
    async fn check_status(sandbox_id: &str, response: Response) -> ChaosLabResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let err = if status == StatusCode::NOT_FOUND {
            SandboxExecError::Unreachable {
                sandbox_id: sandbox_id.to_string(),
                reason: "sandbox no longer exists".to_string(),
            }
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            SandboxExecError::ServerError {
                status: status.as_u16(),
                body,
            }
        } else {
            SandboxExecError::Rejected {
                status: status.as_u16(),
                body,
            }
        };
        Err(err.into())
    }
}

#[async_trait]
impl SandboxProvider for HttpSandboxProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create(&self) -> ChaosLabResult<SandboxHandle> {
        let response = self
            .http_client
            .post(self.endpoint("sandboxes")?)
            .header("X-API-Key", self.api_key.expose_secret())
            .timeout(CONTROL_REQUEST_TIMEOUT)
            .json(&json!({ "timeout_seconds": SANDBOX_LIFETIME_SECONDS }))
            .send()
            .await
            .map_err(|e| Self::unreachable("new", e))?;

        let response = Self::check_status("new", response).await?;
        let created: CreateSandboxResponse = response.json().await?;

        let mut handle = SandboxHandle::remote(created.sandbox_id);
        if let Some(home_dir) = created.home_dir {
            handle.home_dir = home_dir;
        }
        if let Some(port) = created.app_port {
            handle.app_port = port;
        }
        Ok(handle)
    }

    async fn exec(
        &self,
        handle: &SandboxHandle,
        command: &str,
        timeout: Duration,
    ) -> ChaosLabResult<ExecOutput> {
        let url = self.endpoint(&format!("sandboxes/{}/commands", handle.sandbox_id))?;
        let response = self
            .http_client
            .post(url)
            .header("X-API-Key", self.api_key.expose_secret())
            .timeout(timeout + REQUEST_OVERHEAD)
            .json(&json!({
                "command": command,
                "timeout_seconds": timeout.as_secs().max(1),
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SandboxExecError::Timeout {
                        sandbox_id: handle.sandbox_id.clone(),
                        seconds: timeout.as_secs(),
                    }
                    .into()
                } else {
                    Self::unreachable(&handle.sandbox_id, e)
                }
            })?;

        let response = Self::check_status(&handle.sandbox_id, response).await?;
        Ok(response.json::<ExecOutput>().await?)
    }

    async fn write_file(
        &self,
        handle: &SandboxHandle,
        path: &str,
        contents: &str,
    ) -> ChaosLabResult<()> {
        let url = self.endpoint(&format!("sandboxes/{}/files", handle.sandbox_id))?;
        let response = self
            .http_client
            .put(url)
            .header("X-API-Key", self.api_key.expose_secret())
            .timeout(CONTROL_REQUEST_TIMEOUT)
            .json(&json!({ "path": path, "content": contents }))
            .send()
            .await
            .map_err(|e| Self::unreachable(&handle.sandbox_id, e))?;

        Self::check_status(&handle.sandbox_id, response).await?;
        Ok(())
    }

    async fn destroy(&self, handle: &SandboxHandle) -> ChaosLabResult<()> {
        let url = self.endpoint(&format!("sandboxes/{}", handle.sandbox_id))?;
        let response = self
            .http_client
            .delete(url)
            .header("X-API-Key", self.api_key.expose_secret())
            .timeout(CONTROL_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| Self::unreachable(&handle.sandbox_id, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check_status(&handle.sandbox_id, response).await?;
        Ok(())
    }
}
