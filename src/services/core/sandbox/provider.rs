// src/services/core/sandbox/provider.rs

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::{ChaosLabError, ChaosLabResult};

/// How strongly a sandbox is separated from the host running the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Dedicated remote machine; faults may consume the whole box
    Remote,
    /// Scratch directory on the orchestrator host; fault footprints are capped
    LocalProcess,
}

/// Reference to a provisioned sandbox
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub sandbox_id: String,
    /// Directory the workload and fault scripts live in
    pub home_dir: String,
    /// Port the workload listens on inside the sandbox
    pub app_port: u16,
    pub isolation: Isolation,
}

impl SandboxHandle {
    pub fn remote(sandbox_id: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            home_dir: "/home/user".to_string(),
            app_port: 5000,
            isolation: Isolation::Remote,
        }
    }

    /// Absolute path of `relative` inside the sandbox home directory
    pub fn path(&self, relative: &str) -> String {
        format!("{}/{}", self.home_dir.trim_end_matches('/'), relative)
    }
}

/// Result of a shell command run inside a sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Failures at the provider boundary, before they are folded into [`ChaosLabError`]
#[derive(Debug, Error)]
pub enum SandboxExecError {
    #[error("sandbox {sandbox_id} is unreachable: {reason}")]
    Unreachable { sandbox_id: String, reason: String },
    #[error("command in sandbox {sandbox_id} timed out after {seconds}s")]
    Timeout { sandbox_id: String, seconds: u64 },
    #[error("sandbox API rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("sandbox API returned {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("local sandbox I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SandboxExecError> for ChaosLabError {
    fn from(err: SandboxExecError) -> Self {
        let message = err.to_string();
        match err {
            SandboxExecError::Unreachable { sandbox_id, .. } => {
                ChaosLabError::transport_error(message)
                    .with_detail("sandbox_id", serde_json::Value::String(sandbox_id))
            }
            SandboxExecError::Timeout { sandbox_id, .. } => ChaosLabError::timeout_error(message)
                .with_detail("sandbox_id", serde_json::Value::String(sandbox_id)),
            SandboxExecError::ServerError { status, .. } => {
                ChaosLabError::transport_error(message).with_status(status)
            }
            SandboxExecError::Rejected { .. } | SandboxExecError::Io(_) => {
                ChaosLabError::sandbox_error(message)
            }
        }
    }
}

/// Isolated execution environment hosting the workload and the fault scripts.
///
/// `exec` returns `Ok` whenever the command ran, whatever its exit code;
/// `Err` means the sandbox itself could not be reached.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create(&self) -> ChaosLabResult<SandboxHandle>;

    async fn exec(
        &self,
        handle: &SandboxHandle,
        command: &str,
        timeout: Duration,
    ) -> ChaosLabResult<ExecOutput>;

    async fn write_file(
        &self,
        handle: &SandboxHandle,
        path: &str,
        contents: &str,
    ) -> ChaosLabResult<()>;

    /// Idempotent; destroying an already-gone sandbox succeeds
    async fn destroy(&self, handle: &SandboxHandle) -> ChaosLabResult<()>;
}
