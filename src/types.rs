// src/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{validate_range, ChaosLabError, ChaosLabResult};

/// Category of injected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaosScenario {
    NetworkDelay,
    MemoryPressure,
    DiskFull,
    ProcessKill,
    DependencyFailure,
}

impl ChaosScenario {
    pub const ALL: [ChaosScenario; 5] = [
        ChaosScenario::NetworkDelay,
        ChaosScenario::MemoryPressure,
        ChaosScenario::DiskFull,
        ChaosScenario::ProcessKill,
        ChaosScenario::DependencyFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChaosScenario::NetworkDelay => "network_delay",
            ChaosScenario::MemoryPressure => "memory_pressure",
            ChaosScenario::DiskFull => "disk_full",
            ChaosScenario::ProcessKill => "process_kill",
            ChaosScenario::DependencyFailure => "dependency_failure",
        }
    }

    /// Human-readable form ("network delay")
    pub fn display_name(&self) -> String {
        self.as_str().replace('_', " ")
    }
}

impl std::fmt::Display for ChaosScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChaosScenario {
    type Err = ChaosLabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChaosScenario::ALL
            .iter()
            .copied()
            .find(|scenario| scenario.as_str() == s)
            .ok_or_else(|| ChaosLabError::validation_error(format!("Unknown scenario: {}", s)))
    }
}

/// How aggressively a scenario perturbs the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Low,
    #[default]
    Medium,
    High,
}

impl Intensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Low => "low",
            Intensity::Medium => "medium",
            Intensity::High => "high",
        }
    }
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Intensity {
    type Err = ChaosLabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Intensity::Low),
            "medium" => Ok(Intensity::Medium),
            "high" => Ok(Intensity::High),
            other => Err(ChaosLabError::validation_error(format!(
                "Unknown intensity: {}",
                other
            ))),
        }
    }
}

/// Experiment request; immutable once the experiment starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub scenario: ChaosScenario,
    #[serde(default = "ExperimentConfig::default_duration")]
    pub duration_seconds: u32,
    #[serde(default)]
    pub intensity: Intensity,
    #[serde(default = "ExperimentConfig::default_instances")]
    pub num_instances: u32,
}

impl ExperimentConfig {
    pub const MIN_DURATION_SECONDS: u32 = 10;
    pub const MAX_DURATION_SECONDS: u32 = 300;
    pub const MIN_INSTANCES: u32 = 1;
    pub const MAX_INSTANCES: u32 = 5;

    pub fn new(scenario: ChaosScenario, duration_seconds: u32, intensity: Intensity) -> Self {
        Self {
            scenario,
            duration_seconds,
            intensity,
            num_instances: 1,
        }
    }

    pub fn with_instances(mut self, num_instances: u32) -> Self {
        self.num_instances = num_instances;
        self
    }

    fn default_duration() -> u32 {
        60
    }

    fn default_instances() -> u32 {
        1
    }

    /// Range checks run before anything is provisioned
    pub fn validate(&self) -> ChaosLabResult<()> {
        validate_range(
            self.duration_seconds,
            Self::MIN_DURATION_SECONDS,
            Self::MAX_DURATION_SECONDS,
            "duration_seconds",
        )
        .map_err(ChaosLabError::validation_error)?;
        validate_range(
            self.num_instances,
            Self::MIN_INSTANCES,
            Self::MAX_INSTANCES,
            "num_instances",
        )
        .map_err(ChaosLabError::validation_error)?;
        Ok(())
    }
}

/// One point of the sampled history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since experiment start
    pub time_offset: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub cumulative_error_count: u64,
}

impl Sample {
    pub fn new(
        time_offset: u64,
        cpu_percent: f64,
        memory_percent: f64,
        cumulative_error_count: u64,
    ) -> Self {
        Self {
            time_offset,
            cpu_percent,
            memory_percent,
            cumulative_error_count,
        }
    }
}

/// Ordered sampled history of one run (or the average of several runs)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Sample>", into = "Vec<Sample>")]
pub struct Timeline {
    samples: Vec<Sample>,
}

impl TryFrom<Vec<Sample>> for Timeline {
    type Error = ChaosLabError;

    fn try_from(samples: Vec<Sample>) -> Result<Self, Self::Error> {
        Self::from_samples(samples)
    }
}

impl From<Timeline> for Vec<Sample> {
    fn from(timeline: Timeline) -> Self {
        timeline.samples
    }
}

impl Timeline {
    /// Builds a timeline, rejecting out-of-order offsets or a shrinking error counter.
    pub fn from_samples(samples: Vec<Sample>) -> ChaosLabResult<Self> {
        for pair in samples.windows(2) {
            if pair[1].time_offset <= pair[0].time_offset {
                return Err(ChaosLabError::validation_error(format!(
                    "timeline offsets must be strictly increasing ({} then {})",
                    pair[0].time_offset, pair[1].time_offset
                )));
            }
            if pair[1].cumulative_error_count < pair[0].cumulative_error_count {
                return Err(ChaosLabError::validation_error(format!(
                    "cumulative error count decreased at t={}",
                    pair[1].time_offset
                )));
            }
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

/// Read-only summary derived from a timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunMetrics {
    pub cpu_peak: f64,
    pub memory_peak: f64,
    pub total_errors: u64,
    /// `None` when no spike-then-recovery transition was observed
    pub recovery_time_seconds: Option<f64>,
}

/// Experiment lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentState {
    Pending,
    Running,
    Analyzing,
    Completed,
    Failed,
}

impl ExperimentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentState::Pending => "pending",
            ExperimentState::Running => "running",
            ExperimentState::Analyzing => "analyzing",
            ExperimentState::Completed => "completed",
            ExperimentState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentState::Completed | ExperimentState::Failed)
    }
}

impl std::fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ChaosLabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(ChaosLabError::validation_error(format!(
                "Unknown severity: {}",
                other
            ))),
        }
    }
}

/// Where an analysis came from; `Fallback` marks a degraded result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Remote,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub metrics: RunMetrics,
    pub severity: Severity,
    pub recommendations: Vec<String>,
    pub source: AnalysisSource,
}

/// Full experiment record, polled by status readers and archived on completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub config: ExperimentConfig,
    pub state: ExperimentState,
    pub progress_percent: u8,
    pub timeline: Option<Timeline>,
    pub metrics: Option<RunMetrics>,
    pub analysis: Option<AnalysisResult>,
    pub dashboard_url: Option<String>,
    pub failure_message: Option<String>,
    /// Instances that actually produced a timeline
    pub num_instances: Option<u32>,
    pub raw_logs: Option<String>,
    /// Per-instance timelines, kept only when retention is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_timelines: Option<Vec<Timeline>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Experiment {
    pub fn new(id: String, config: ExperimentConfig) -> Self {
        Self {
            id,
            config,
            state: ExperimentState::Pending,
            progress_percent: 0,
            timeline: None,
            metrics: None,
            analysis: None,
            dashboard_url: None,
            failure_message: None,
            num_instances: None,
            raw_logs: None,
            instance_timelines: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Polling view of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub experiment_id: String,
    pub state: ExperimentState,
    pub progress_percent: u8,
    pub message: Option<String>,
}
