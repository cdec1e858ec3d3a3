// src/services/core/sandbox/local_provider.rs

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::provider::{ExecOutput, Isolation, SandboxExecError, SandboxHandle, SandboxProvider};
use crate::utils::{ChaosLabError, ChaosLabResult};

/// Runs each sandbox as a scratch directory on the local host.
///
/// Commands go through `bash -c` with the scratch directory as working
/// directory. Destroy kills every process whose command line mentions the
/// directory, then removes it.
pub struct LocalProcessSandboxProvider {
    base_dir: PathBuf,
}

impl LocalProcessSandboxProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Scratch space under the system temp directory
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("chaoslab-sandboxes"))
    }

    fn free_port() -> ChaosLabResult<u16> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| ChaosLabError::sandbox_error(format!("No free local port: {}", e)))?;
        Ok(listener.local_addr()?.port())
    }

    fn ensure_alive(handle: &SandboxHandle) -> ChaosLabResult<()> {
        if Path::new(&handle.home_dir).is_dir() {
            Ok(())
        } else {
            Err(SandboxExecError::Unreachable {
                sandbox_id: handle.sandbox_id.clone(),
                reason: "sandbox directory is gone".to_string(),
            }
            .into())
        }
    }
}

#[async_trait]
impl SandboxProvider for LocalProcessSandboxProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create(&self) -> ChaosLabResult<SandboxHandle> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let sandbox_id = format!("local-{}", &id[..12]);
        let home_dir = self.base_dir.join(&sandbox_id);
        tokio::fs::create_dir_all(&home_dir)
            .await
            .map_err(SandboxExecError::from)?;

        Ok(SandboxHandle {
            sandbox_id,
            home_dir: home_dir.to_string_lossy().into_owned(),
            app_port: Self::free_port()?,
            isolation: Isolation::LocalProcess,
        })
    }

    async fn exec(
        &self,
        handle: &SandboxHandle,
        command: &str,
        timeout: Duration,
    ) -> ChaosLabResult<ExecOutput> {
        Self::ensure_alive(handle)?;

        let child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&handle.home_dir)
            .env("SANDBOX_HOME", &handle.home_dir)
            .env("APP_PORT", handle.app_port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxExecError::from)?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(SandboxExecError::from)?,
            Err(_) => {
                return Err(SandboxExecError::Timeout {
                    sandbox_id: handle.sandbox_id.clone(),
                    seconds: timeout.as_secs(),
                }
                .into())
            }
        };

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal has no code
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn write_file(
        &self,
        handle: &SandboxHandle,
        path: &str,
        contents: &str,
    ) -> ChaosLabResult<()> {
        Self::ensure_alive(handle)?;

        let target = Path::new(path);
        if !target.starts_with(&handle.home_dir) {
            return Err(ChaosLabError::sandbox_error(format!(
                "Refusing to write outside sandbox home: {}",
                path
            )));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(SandboxExecError::from)?;
        }
        tokio::fs::write(target, contents)
            .await
            .map_err(SandboxExecError::from)?;
        Ok(())
    }

    async fn destroy(&self, handle: &SandboxHandle) -> ChaosLabResult<()> {
        // pkill exits 1 when nothing matched
        let _ = Command::new("pkill")
            .arg("-f")
            .arg(&handle.home_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match tokio::fs::remove_dir_all(&handle.home_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxExecError::from(e).into()),
        }
    }
}
