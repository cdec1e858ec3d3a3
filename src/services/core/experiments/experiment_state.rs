// src/services/core/experiments/experiment_state.rs

use crate::services::core::chaos::CollectedRun;
use crate::types::{
    AnalysisResult, Experiment, ExperimentConfig, ExperimentState, StatusResponse,
};
use crate::utils::time::now_utc;
use crate::utils::{ChaosLabError, ChaosLabResult};

/// Progress at each lifecycle milestone
pub const PROGRESS_RUNNING: u8 = 10;
pub const PROGRESS_ANALYZING: u8 = 85;
pub const PROGRESS_ANALYSIS_DONE: u8 = 90;
pub const PROGRESS_DASHBOARD_DONE: u8 = 95;
pub const PROGRESS_COMPLETED: u8 = 100;

/// Owns one experiment record and enforces its lifecycle.
///
/// ```text
/// pending -> running -> analyzing -> completed
///    \          \           \
///     +----------+-----------+--> failed
/// ```
///
/// Progress never decreases and reaches 100 only on completion. A failed
/// experiment keeps the progress it had when it failed.
#[derive(Debug, Clone)]
pub struct ExperimentStateMachine {
    experiment: Experiment,
}

impl ExperimentStateMachine {
    pub fn new(id: String, config: ExperimentConfig) -> Self {
        Self {
            experiment: Experiment::new(id, config),
        }
    }

    pub fn id(&self) -> &str {
        &self.experiment.id
    }

    pub fn state(&self) -> ExperimentState {
        self.experiment.state
    }

    pub fn progress(&self) -> u8 {
        self.experiment.progress_percent
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.experiment.config
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn snapshot(&self) -> Experiment {
        self.experiment.clone()
    }

    pub fn status(&self) -> StatusResponse {
        let message = match self.experiment.state {
            ExperimentState::Pending => Some("Experiment queued".to_string()),
            ExperimentState::Running => Some("Running chaos scenario".to_string()),
            ExperimentState::Analyzing => Some("Analyzing results".to_string()),
            ExperimentState::Completed => Some("Experiment completed".to_string()),
            ExperimentState::Failed => self.experiment.failure_message.clone(),
        };
        StatusResponse {
            experiment_id: self.experiment.id.clone(),
            state: self.experiment.state,
            progress_percent: self.experiment.progress_percent,
            message,
        }
    }

    fn expect_state(&self, expected: ExperimentState, action: &str) -> ChaosLabResult<()> {
        if self.experiment.state == expected {
            Ok(())
        } else {
            Err(ChaosLabError::internal_error(format!(
                "Cannot {} experiment {} in state {}",
                action, self.experiment.id, self.experiment.state
            )))
        }
    }

    fn raise_progress(&mut self, percent: u8) {
        // 100 is reserved for completion
        let capped = percent.min(PROGRESS_COMPLETED - 1);
        self.experiment.progress_percent = self.experiment.progress_percent.max(capped);
    }

    pub fn begin_running(&mut self) -> ChaosLabResult<()> {
        self.expect_state(ExperimentState::Pending, "start")?;
        self.experiment.state = ExperimentState::Running;
        self.experiment.started_at = Some(now_utc());
        self.raise_progress(PROGRESS_RUNNING);
        Ok(())
    }

    /// Intermediate progress while running or analyzing; ignored otherwise
    pub fn record_progress(&mut self, percent: u8) {
        if matches!(
            self.experiment.state,
            ExperimentState::Running | ExperimentState::Analyzing
        ) {
            self.raise_progress(percent);
        }
    }

    pub fn begin_analyzing(&mut self, run: CollectedRun) -> ChaosLabResult<()> {
        self.expect_state(ExperimentState::Running, "analyze")?;
        self.experiment.state = ExperimentState::Analyzing;
        self.experiment.timeline = Some(run.timeline);
        self.experiment.metrics = Some(run.metrics);
        self.experiment.num_instances = Some(run.num_instances);
        self.experiment.raw_logs = Some(run.logs);
        self.experiment.instance_timelines = run.instance_timelines;
        self.raise_progress(PROGRESS_ANALYZING);
        Ok(())
    }

    pub fn record_analysis(&mut self, analysis: AnalysisResult) -> ChaosLabResult<()> {
        self.expect_state(ExperimentState::Analyzing, "record analysis for")?;
        self.experiment.analysis = Some(analysis);
        self.raise_progress(PROGRESS_ANALYSIS_DONE);
        Ok(())
    }

    pub fn record_dashboard(&mut self, url: String) -> ChaosLabResult<()> {
        self.expect_state(ExperimentState::Analyzing, "record dashboard for")?;
        self.experiment.dashboard_url = Some(url);
        self.raise_progress(PROGRESS_DASHBOARD_DONE);
        Ok(())
    }

    /// Requires analysis and dashboard to have been recorded
    pub fn complete(&mut self) -> ChaosLabResult<()> {
        self.expect_state(ExperimentState::Analyzing, "complete")?;
        if self.experiment.analysis.is_none() || self.experiment.dashboard_url.is_none() {
            return Err(ChaosLabError::internal_error(format!(
                "Experiment {} is missing analysis or dashboard",
                self.experiment.id
            )));
        }
        self.experiment.state = ExperimentState::Completed;
        self.experiment.progress_percent = PROGRESS_COMPLETED;
        self.experiment.finished_at = Some(now_utc());
        Ok(())
    }

    /// Terminal failure from any non-terminal state. Partial results are dropped.
    pub fn fail(&mut self, message: impl Into<String>) -> ChaosLabResult<()> {
        if self.experiment.state.is_terminal() {
            return Err(ChaosLabError::internal_error(format!(
                "Experiment {} already finished as {}",
                self.experiment.id, self.experiment.state
            )));
        }
        self.experiment.state = ExperimentState::Failed;
        self.experiment.failure_message = Some(message.into());
        self.experiment.timeline = None;
        self.experiment.metrics = None;
        self.experiment.analysis = None;
        self.experiment.dashboard_url = None;
        self.experiment.instance_timelines = None;
        self.experiment.finished_at = Some(now_utc());
        Ok(())
    }
}
