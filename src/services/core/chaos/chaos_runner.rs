// src/services/core/chaos/chaos_runner.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::sample_source::SandboxSampleSource;
use super::timeline_collector::{CollectorConfig, TimelineCollector};
use super::workload::{self, FaultScript, APP_LOG, DISK_ERRORS_LOG};
use crate::services::core::sandbox::{create_with_retry, RetryConfig, SandboxHandle, SandboxProvider};
use crate::types::{ExperimentConfig, Timeline};
use crate::utils::{ChaosLabResult, ErrorKind, Logger};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub provision_retry: RetryConfig,
    pub collector: CollectorConfig,
    /// Pause between starting the workload and probing its health
    pub deploy_settle_seconds: u64,
    /// Bytes of workload log kept per instance
    pub log_tail_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            provision_retry: RetryConfig::default(),
            collector: CollectorConfig::default(),
            deploy_settle_seconds: 5,
            log_tail_bytes: 2000,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> ChaosLabResult<()> {
        self.provision_retry.validate()?;
        self.collector.validate()?;
        Ok(())
    }
}

/// Milestones of a single-instance run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunCheckpoint {
    Provisioning,
    SandboxReady,
    WorkloadDeployed,
    ChaosComplete,
}

impl RunCheckpoint {
    pub fn progress_percent(&self) -> u8 {
        match self {
            RunCheckpoint::Provisioning => 10,
            RunCheckpoint::SandboxReady => 30,
            RunCheckpoint::WorkloadDeployed => 50,
            RunCheckpoint::ChaosComplete => 70,
        }
    }
}

/// Receives run milestones; must not block
pub trait ProgressReporter: Send + Sync {
    fn checkpoint(&self, checkpoint: RunCheckpoint);
}

pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn checkpoint(&self, _checkpoint: RunCheckpoint) {}
}

/// Output of one instance: its timeline and the tail of its workload log
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRun {
    pub timeline: Timeline,
    pub logs: String,
}

/// One complete provision-to-teardown run
#[async_trait]
pub trait InstanceRunner: Send + Sync {
    async fn run(
        &self,
        experiment_id: &str,
        config: &ExperimentConfig,
        instance: usize,
        progress: &dyn ProgressReporter,
    ) -> ChaosLabResult<InstanceRun>;
}

/// Destroys the sandbox if the run is dropped before teardown (e.g. by a timeout guard)
struct SandboxGuard {
    provider: Arc<dyn SandboxProvider>,
    handle: Option<SandboxHandle>,
}

impl SandboxGuard {
    async fn release(mut self, logger: &Logger) {
        if let Some(handle) = self.handle.take() {
            match self.provider.destroy(&handle).await {
                Ok(()) => logger.debug("Sandbox destroyed"),
                Err(e) => logger.warn_with_meta(
                    "Sandbox teardown failed",
                    Some(&serde_json::json!({ "sandbox_id": handle.sandbox_id, "error": e.message })),
                ),
            }
        }
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let provider = Arc::clone(&self.provider);
                runtime.spawn(async move {
                    let _ = provider.destroy(&handle).await;
                });
            }
        }
    }
}

/// Drives one sandbox through provision, deploy, concurrent chaos and sampling, teardown
pub struct ChaosRunner {
    provider: Arc<dyn SandboxProvider>,
    config: RunnerConfig,
    logger: Logger,
}

impl ChaosRunner {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: RunnerConfig, logger: Logger) -> Self {
        Self {
            provider,
            config,
            logger,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    async fn run_in_sandbox(
        &self,
        handle: &SandboxHandle,
        config: &ExperimentConfig,
        progress: &dyn ProgressReporter,
        logger: &Logger,
    ) -> ChaosLabResult<InstanceRun> {
        workload::deploy_workload(
            self.provider.as_ref(),
            handle,
            Duration::from_secs(self.config.deploy_settle_seconds),
            logger,
        )
        .await?;
        progress.checkpoint(RunCheckpoint::WorkloadDeployed);

        let script = FaultScript::render(
            config.scenario,
            config.intensity,
            config.duration_seconds,
            handle,
        );
        self.provider
            .write_file(handle, &script.path, &script.body)
            .await?;

        let source = SandboxSampleSource::new(
            Arc::clone(&self.provider),
            handle.clone(),
            handle.path(APP_LOG),
        )
        .with_extra_log(handle.path(DISK_ERRORS_LOG));
        let collector = TimelineCollector::new(self.config.collector.clone(), logger.clone());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let duration = Duration::from_secs(u64::from(config.duration_seconds));

        logger.info_with_meta(
            "Chaos phase started",
            Some(&serde_json::json!({
                "scenario": config.scenario.as_str(),
                "intensity": config.intensity.as_str(),
                "duration_seconds": config.duration_seconds,
            })),
        );

        let fault = async {
            let command = format!("bash '{}'", script.path);
            let result = self.provider.exec(handle, &command, script.timeout).await;
            if matches!(&result, Err(e) if e.kind != ErrorKind::TimeoutError) {
                // Sandbox is gone; stop sampling a dead target
                let _ = cancel_tx.send(true);
            }
            result
        };

        let (timeline, fault_result) =
            tokio::join!(collector.collect(&source, duration, cancel_rx), fault);

        match fault_result {
            Ok(output) if !output.success() => logger.warn_with_meta(
                "Fault script exited non-zero",
                Some(&serde_json::json!({
                    "exit_code": output.exit_code,
                    "stderr": crate::utils::truncate_utf8(&output.stderr, 500),
                })),
            ),
            Ok(_) => {}
            Err(e) if e.kind == ErrorKind::TimeoutError => logger.warn_with_meta(
                "Fault script overran its deadline",
                Some(&serde_json::json!({ "timeout_seconds": script.timeout.as_secs() })),
            ),
            Err(e) => return Err(e),
        }

        let timeline = timeline?;
        progress.checkpoint(RunCheckpoint::ChaosComplete);

        let logs =
            workload::capture_workload_logs(self.provider.as_ref(), handle, self.config.log_tail_bytes)
                .await;

        Ok(InstanceRun { timeline, logs })
    }
}

#[async_trait]
impl InstanceRunner for ChaosRunner {
    async fn run(
        &self,
        experiment_id: &str,
        config: &ExperimentConfig,
        instance: usize,
        progress: &dyn ProgressReporter,
    ) -> ChaosLabResult<InstanceRun> {
        let logger = self.logger.for_experiment(experiment_id, Some(instance));
        progress.checkpoint(RunCheckpoint::Provisioning);

        let handle = create_with_retry(
            self.provider.as_ref(),
            &self.config.provision_retry,
            &logger,
        )
        .await?;
        let guard = SandboxGuard {
            provider: Arc::clone(&self.provider),
            handle: Some(handle.clone()),
        };
        progress.checkpoint(RunCheckpoint::SandboxReady);

        let outcome = self.run_in_sandbox(&handle, config, progress, &logger).await;
        guard.release(&logger).await;

        match &outcome {
            Ok(run) => logger.info_with_meta(
                "Instance run finished",
                Some(&serde_json::json!({ "samples": run.timeline.len() })),
            ),
            Err(e) => logger.error_with_meta(
                "Instance run failed",
                Some(&serde_json::json!({ "error": e.message, "kind": e.kind })),
            ),
        }
        outcome
    }
}
