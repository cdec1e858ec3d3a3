// src/services/core/sandbox/mod.rs

//! Sandbox providers: where the workload and the injected faults actually run.

pub mod http_provider;
pub mod local_provider;
pub mod provider;
pub mod retry;

pub use http_provider::HttpSandboxProvider;
pub use local_provider::LocalProcessSandboxProvider;
pub use provider::{ExecOutput, Isolation, SandboxExecError, SandboxHandle, SandboxProvider};
pub use retry::{create_with_retry, RetryConfig};
