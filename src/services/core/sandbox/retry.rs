// src/services/core/sandbox/retry.rs

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::provider::{SandboxHandle, SandboxProvider};
use crate::utils::{ChaosLabError, ChaosLabResult, Logger};

/// Backoff policy for sandbox provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> ChaosLabResult<()> {
        if self.max_attempts == 0 {
            return Err(ChaosLabError::config_error(
                "Retry max_attempts must be at least 1",
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ChaosLabError::config_error(
                "Retry backoff_multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }

    /// Delay before the attempt following `attempt` (zero-based)
    pub fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((delay as u64).min(self.max_delay_ms))
    }
}

/// Creates a sandbox, retrying transient failures with exponential backoff.
///
/// Non-transient failures (rejected credentials, bad requests) stop immediately.
pub async fn create_with_retry(
    provider: &dyn SandboxProvider,
    retry: &RetryConfig,
    logger: &Logger,
) -> ChaosLabResult<SandboxHandle> {
    let mut last_error = None;

    for attempt in 0..retry.max_attempts {
        match provider.create().await {
            Ok(handle) => {
                logger.info_with_meta(
                    "Sandbox created",
                    Some(&serde_json::json!({
                        "provider": provider.name(),
                        "sandbox_id": handle.sandbox_id,
                        "attempt": attempt + 1,
                    })),
                );
                return Ok(handle);
            }
            Err(e) => {
                let transient = e.is_transient();
                logger.warn_with_meta(
                    "Sandbox creation failed",
                    Some(&serde_json::json!({
                        "provider": provider.name(),
                        "attempt": attempt + 1,
                        "max_attempts": retry.max_attempts,
                        "error": e.message,
                    })),
                );
                last_error = Some(e);

                if !transient {
                    break;
                }
                if attempt + 1 < retry.max_attempts {
                    tokio::time::sleep(retry.calculate_retry_delay(attempt)).await;
                }
            }
        }
    }

    let cause = last_error
        .map(|e| e.message)
        .unwrap_or_else(|| "no attempts made".to_string());
    Err(ChaosLabError::sandbox_error(format!(
        "Failed to create sandbox after {} attempt(s): {}",
        retry.max_attempts, cause
    )))
}
