// src/services/core/experiments/experiment_service.rs

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::experiment_state::ExperimentStateMachine;
use crate::config::AppConfig;
use crate::services::core::ai::AnalysisRequest;
use crate::services::core::chaos::{
    ChaosRunner, CollectedRun, InstanceAverager, InstanceRunner, ProgressReporter, RunCheckpoint,
    RunnerConfig,
};
use crate::services::core::infrastructure::{DashboardRequest, ServiceContainer, ServiceHealthStatus};
use crate::types::{Experiment, ExperimentConfig, StatusResponse};
use crate::utils::time::now_utc;
use crate::utils::{validate_range, ChaosLabError, ChaosLabResult, ErrorKind, Logger};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentServiceConfig {
    pub runner: RunnerConfig,
    pub max_parallel_instances: usize,
    pub retain_instance_timelines: bool,
    /// Run phase may take `2 * duration + timeout_grace_seconds` before it is abandoned
    pub timeout_grace_seconds: u64,
}

impl Default for ExperimentServiceConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            max_parallel_instances: 5,
            retain_instance_timelines: false,
            timeout_grace_seconds: 300,
        }
    }
}

impl ExperimentServiceConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let mut service = Self::default();
        let collector = &mut service.runner.collector;
        collector.sample_interval_seconds = config.sample_interval_seconds;
        // Slow cadences still need two missed ticks before a sandbox counts as lost
        collector.unreachable_window_seconds = collector
            .unreachable_window_seconds
            .max(2 * config.sample_interval_seconds);
        service.max_parallel_instances = config.max_parallel_instances;
        service.retain_instance_timelines = config.retain_instance_timelines;
        service
    }

    pub fn validate(&self) -> ChaosLabResult<()> {
        self.runner.validate()?;
        validate_range(
            self.max_parallel_instances,
            1,
            ExperimentConfig::MAX_INSTANCES as usize,
            "max_parallel_instances",
        )
        .map_err(ChaosLabError::config_error)?;
        Ok(())
    }

    pub fn run_timeout(&self, config: &ExperimentConfig) -> Duration {
        Duration::from_secs(u64::from(config.duration_seconds) * 2 + self.timeout_grace_seconds)
    }
}

type SharedExperiment = Arc<StdRwLock<ExperimentStateMachine>>;

fn read_experiment<T>(
    shared: &SharedExperiment,
    f: impl FnOnce(&ExperimentStateMachine) -> T,
) -> ChaosLabResult<T> {
    let guard = shared
        .read()
        .map_err(|_| ChaosLabError::internal_error("Experiment lock poisoned"))?;
    Ok(f(&guard))
}

fn write_experiment<T>(
    shared: &SharedExperiment,
    f: impl FnOnce(&mut ExperimentStateMachine) -> ChaosLabResult<T>,
) -> ChaosLabResult<T> {
    let mut guard = shared
        .write()
        .map_err(|_| ChaosLabError::internal_error("Experiment lock poisoned"))?;
    f(&mut guard)
}

/// Feeds runner checkpoints into the experiment record
struct ExperimentProgress {
    shared: SharedExperiment,
}

impl ProgressReporter for ExperimentProgress {
    fn checkpoint(&self, checkpoint: RunCheckpoint) {
        let _ = write_experiment(&self.shared, |sm| {
            sm.record_progress(checkpoint.progress_percent());
            Ok(())
        });
    }
}

struct ServiceInner {
    container: ServiceContainer,
    runner: Arc<dyn InstanceRunner>,
    averager: InstanceAverager,
    config: ExperimentServiceConfig,
    experiments: RwLock<HashMap<String, SharedExperiment>>,
    logger: Logger,
}

impl ServiceInner {
    async fn collect(
        &self,
        experiment_id: &str,
        config: &ExperimentConfig,
        progress: &dyn ProgressReporter,
    ) -> ChaosLabResult<CollectedRun> {
        if config.num_instances > 1 {
            self.averager
                .run_parallel(experiment_id, config, progress)
                .await
        } else {
            self.runner
                .run(experiment_id, config, 0, progress)
                .await
                .map(CollectedRun::from_single)
        }
    }

    fn fail(&self, shared: &SharedExperiment, logger: &Logger, error: &ChaosLabError) {
        logger.error_with_meta(
            "Experiment failed",
            Some(&serde_json::json!({ "error": error.message, "kind": error.kind })),
        );
        if let Err(e) = write_experiment(shared, |sm| sm.fail(error.message.clone())) {
            logger.warn_with_meta(
                "Could not mark experiment failed",
                Some(&serde_json::json!({ "error": e.message })),
            );
        }
    }

    /// Runs one experiment from pending to a terminal state
    async fn drive(self: Arc<Self>, shared: SharedExperiment, id: String, config: ExperimentConfig) {
        let logger = self.logger.for_experiment(&id, None);

        if let Err(e) = write_experiment(&shared, |sm| sm.begin_running()) {
            self.fail(&shared, &logger, &e);
            return;
        }
        logger.info_with_meta(
            "Experiment running",
            Some(&serde_json::json!({
                "scenario": config.scenario.as_str(),
                "intensity": config.intensity.as_str(),
                "duration_seconds": config.duration_seconds,
                "num_instances": config.num_instances,
            })),
        );

        let progress = ExperimentProgress {
            shared: Arc::clone(&shared),
        };
        let limit = self.config.run_timeout(&config);
        let run = match tokio::time::timeout(limit, self.collect(&id, &config, &progress)).await {
            Ok(Ok(run)) => run,
            Ok(Err(e)) => {
                self.fail(&shared, &logger, &e);
                return;
            }
            Err(_) => {
                let e = ChaosLabError::timeout_error(format!(
                    "Experiment exceeded its {}s time limit",
                    limit.as_secs()
                ));
                self.fail(&shared, &logger, &e);
                return;
            }
        };

        if let Err(e) = write_experiment(&shared, |sm| sm.begin_analyzing(run.clone())) {
            self.fail(&shared, &logger, &e);
            return;
        }

        let analysis = self
            .container
            .analysis
            .analyze(&AnalysisRequest {
                experiment_id: &id,
                config: &config,
                timeline: &run.timeline,
                metrics: &run.metrics,
                logs: &run.logs,
                num_instances: run.num_instances,
            })
            .await;

        let started_at = read_experiment(&shared, |sm| sm.experiment().started_at)
            .ok()
            .flatten()
            .unwrap_or_else(now_utc);
        let dashboard_url = self
            .container
            .dashboard
            .publish(&DashboardRequest {
                experiment_id: &id,
                config: &config,
                timeline: &run.timeline,
                metrics: &run.metrics,
                analysis: &analysis,
                started_at,
            })
            .await;

        let completed = write_experiment(&shared, |sm| {
            sm.record_analysis(analysis)?;
            sm.record_dashboard(dashboard_url)?;
            sm.complete()?;
            Ok(sm.snapshot())
        });
        let record = match completed {
            Ok(record) => record,
            Err(e) => {
                self.fail(&shared, &logger, &e);
                return;
            }
        };

        logger.info_with_meta(
            "Experiment completed",
            Some(&serde_json::json!({
                "num_instances": record.num_instances,
                "dashboard_url": record.dashboard_url,
            })),
        );

        if let Err(e) = self.container.archive.store(&record).await {
            logger.warn_with_meta(
                "Failed to archive experiment results",
                Some(&serde_json::json!({ "error": e.message })),
            );
        }
    }
}

/// Request surface for starting experiments and polling their progress
pub struct ExperimentService {
    inner: Arc<ServiceInner>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ExperimentService {
    /// Service backed by real sandboxes from `container`
    pub fn new(
        container: ServiceContainer,
        config: ExperimentServiceConfig,
        logger: Logger,
    ) -> ChaosLabResult<Self> {
        let runner = Arc::new(ChaosRunner::new(
            Arc::clone(&container.sandbox_provider),
            config.runner.clone(),
            logger.clone(),
        ));
        Self::with_runner(container, runner, config, logger)
    }

    /// Service with a custom instance runner
    pub fn with_runner(
        container: ServiceContainer,
        runner: Arc<dyn InstanceRunner>,
        config: ExperimentServiceConfig,
        logger: Logger,
    ) -> ChaosLabResult<Self> {
        config.validate()?;
        let averager = InstanceAverager::new(
            Arc::clone(&runner),
            config.max_parallel_instances,
            config.retain_instance_timelines,
            logger.clone(),
        );
        Ok(Self {
            inner: Arc::new(ServiceInner {
                container,
                runner,
                averager,
                config,
                experiments: RwLock::new(HashMap::new()),
                logger,
            }),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Validates `config`, registers a pending experiment and starts it in the background
    pub async fn start(&self, config: ExperimentConfig) -> ChaosLabResult<String> {
        config.validate()?;

        let (id, shared) = {
            let mut experiments = self.inner.experiments.write().await;
            let id = loop {
                let candidate = format!("exp_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
                if !experiments.contains_key(&candidate) {
                    break candidate;
                }
            };
            let shared = Arc::new(StdRwLock::new(ExperimentStateMachine::new(
                id.clone(),
                config.clone(),
            )));
            experiments.insert(id.clone(), Arc::clone(&shared));
            (id, shared)
        };

        self.inner.logger.info_with_meta(
            "Experiment accepted",
            Some(&serde_json::json!({ "experiment_id": id, "scenario": config.scenario.as_str() })),
        );

        let handle = tokio::spawn(Arc::clone(&self.inner).drive(shared, id.clone(), config));
        self.tasks.lock().await.insert(id.clone(), handle);
        Ok(id)
    }

    async fn lookup(&self, experiment_id: &str) -> Option<SharedExperiment> {
        self.inner
            .experiments
            .read()
            .await
            .get(experiment_id)
            .cloned()
    }

    pub async fn get_status(&self, experiment_id: &str) -> ChaosLabResult<StatusResponse> {
        match self.lookup(experiment_id).await {
            Some(shared) => read_experiment(&shared, |sm| sm.status()),
            None => Err(ChaosLabError::not_found(format!(
                "Experiment {} not found",
                experiment_id
            ))),
        }
    }

    /// Full record of a finished experiment; archived records are found after `remove`
    pub async fn get_results(&self, experiment_id: &str) -> ChaosLabResult<Experiment> {
        if let Some(shared) = self.lookup(experiment_id).await {
            let experiment = read_experiment(&shared, |sm| sm.snapshot())?;
            if !experiment.state.is_terminal() {
                return Err(ChaosLabError::not_ready(format!(
                    "Experiment {} is still {}",
                    experiment_id, experiment.state
                ))
                .with_detail("progress_percent", experiment.progress_percent.into()));
            }
            return Ok(experiment);
        }

        match self.inner.container.archive.load(experiment_id).await {
            Ok(Some(experiment)) => Ok(experiment),
            Ok(None) => Err(ChaosLabError::not_found(format!(
                "Experiment {} not found",
                experiment_id
            ))),
            Err(e) if e.kind == ErrorKind::ValidationError => Err(
                ChaosLabError::not_found(format!("Experiment {} not found", experiment_id)),
            ),
            Err(e) => Err(e),
        }
    }

    /// Waits until the experiment's background task has finished
    pub async fn wait(&self, experiment_id: &str) -> ChaosLabResult<()> {
        let handle = self.tasks.lock().await.remove(experiment_id);
        if let Some(handle) = handle {
            return handle.await.map_err(|e| {
                ChaosLabError::internal_error(format!("Experiment task panicked: {}", e))
            });
        }
        // Already awaited by an earlier caller
        if self.lookup(experiment_id).await.is_some() {
            return Ok(());
        }
        Err(ChaosLabError::not_found(format!(
            "Experiment {} not found",
            experiment_id
        )))
    }

    /// Drops a finished experiment from memory, returning its final record
    pub async fn remove(&self, experiment_id: &str) -> ChaosLabResult<Experiment> {
        let experiment = self.get_results(experiment_id).await?;
        self.inner.experiments.write().await.remove(experiment_id);
        self.tasks.lock().await.remove(experiment_id);
        Ok(experiment)
    }

    pub async fn list(&self) -> Vec<StatusResponse> {
        let experiments = self.inner.experiments.read().await;
        let mut statuses: Vec<StatusResponse> = experiments
            .values()
            .filter_map(|shared| read_experiment(shared, |sm| sm.status()).ok())
            .collect();
        statuses.sort_by(|a, b| a.experiment_id.cmp(&b.experiment_id));
        statuses
    }

    pub async fn health(&self) -> ServiceHealthStatus {
        let mut status = self.inner.container.health_check();
        status.experiments_tracked = self.inner.experiments.read().await.len();
        status
    }
}
