// Mock Service Implementations
// In-memory collaborators for exercising the experiment pipeline without sandboxes or network
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use chaos_lab::services::core::ai::{fallback_analysis, AnalysisRequest, AnalysisService};
use chaos_lab::services::core::chaos::workload::FAULT_GRACE;
use chaos_lab::services::core::chaos::{
    InstanceRun, InstanceRunner, ProgressReporter, RunCheckpoint, SampleSource,
};
use chaos_lab::services::core::infrastructure::{
    DashboardRequest, DashboardService, ResultArchive, ServiceContainer,
};
use chaos_lab::services::core::sandbox::{ExecOutput, SandboxHandle, SandboxProvider};
use chaos_lab::types::{AnalysisResult, Experiment, ExperimentConfig, Sample, Timeline};
use chaos_lab::utils::{ChaosLabError, ChaosLabResult, LogLevel, Logger};

pub fn quiet_logger() -> Logger {
    Logger::new(LogLevel::Error)
}

/// Timeline from `(offset, cpu, memory, errors)` tuples
pub fn timeline_from(points: &[(u64, f64, f64, u64)]) -> Timeline {
    Timeline::from_samples(
        points
            .iter()
            .map(|&(t, cpu, mem, errors)| Sample::new(t, cpu, mem, errors))
            .collect(),
    )
    .expect("test timeline must be valid")
}

/// Instance runner with a fixed outcome per instance index
pub struct ScriptedRunner {
    fallback: Result<InstanceRun, String>,
    per_instance: HashMap<usize, Result<InstanceRun, String>>,
    delay: Duration,
    gate: watch::Sender<bool>,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    pub fn succeeding(timeline: Timeline) -> Self {
        Self {
            fallback: Ok(InstanceRun {
                timeline,
                logs: "INFO GET /api/data 200\nERROR GET /api/database 503".to_string(),
            }),
            per_instance: HashMap::new(),
            delay: Duration::ZERO,
            gate: watch::channel(true).0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        let mut runner = Self::succeeding(Timeline::default());
        runner.fallback = Err(message.to_string());
        runner
    }

    pub fn with_instance(mut self, instance: usize, timeline: Timeline) -> Self {
        self.per_instance.insert(
            instance,
            Ok(InstanceRun {
                timeline,
                logs: format!("INFO instance {} ok", instance),
            }),
        );
        self
    }

    pub fn with_failed_instance(mut self, instance: usize, message: &str) -> Self {
        self.per_instance.insert(instance, Err(message.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Runs pause after the SandboxReady checkpoint until [`ScriptedRunner::open_gate`]
    pub fn gated(self) -> Self {
        self.gate.send_replace(false);
        self
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstanceRunner for ScriptedRunner {
    async fn run(
        &self,
        _experiment_id: &str,
        _config: &ExperimentConfig,
        instance: usize,
        progress: &dyn ProgressReporter,
    ) -> ChaosLabResult<InstanceRun> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        progress.checkpoint(RunCheckpoint::Provisioning);

        let outcome = self
            .per_instance
            .get(&instance)
            .unwrap_or(&self.fallback)
            .clone();
        let run = outcome.map_err(ChaosLabError::sandbox_error)?;

        progress.checkpoint(RunCheckpoint::SandboxReady);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        progress.checkpoint(RunCheckpoint::WorkloadDeployed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        progress.checkpoint(RunCheckpoint::ChaosComplete);
        Ok(run)
    }
}

/// Deterministic analysis built from the rule-based fallback
#[derive(Default)]
pub struct StaticAnalysis {
    pub calls: AtomicUsize,
}

#[async_trait]
impl AnalysisService for StaticAnalysis {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> AnalysisResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fallback_analysis(request.config.scenario, request.metrics)
    }

    fn is_remote_configured(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct StaticDashboard;

#[async_trait]
impl DashboardService for StaticDashboard {
    async fn publish(&self, request: &DashboardRequest<'_>) -> String {
        format!("http://grafana.test/d/{}", request.experiment_id)
    }

    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct MemoryArchive {
    records: Mutex<HashMap<String, Experiment>>,
}

impl MemoryArchive {
    pub fn stored_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ResultArchive for MemoryArchive {
    async fn store(&self, experiment: &Experiment) -> ChaosLabResult<()> {
        self.records
            .lock()
            .unwrap()
            .insert(experiment.id.clone(), experiment.clone());
        Ok(())
    }

    async fn load(&self, experiment_id: &str) -> ChaosLabResult<Option<Experiment>> {
        Ok(self.records.lock().unwrap().get(experiment_id).cloned())
    }
}

/// Provider for tests that never reach a sandbox
pub struct UnavailableSandboxProvider;

#[async_trait]
impl SandboxProvider for UnavailableSandboxProvider {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn create(&self) -> ChaosLabResult<SandboxHandle> {
        Err(ChaosLabError::transport_error("no sandbox backend in tests"))
    }

    async fn exec(
        &self,
        _handle: &SandboxHandle,
        _command: &str,
        _timeout: Duration,
    ) -> ChaosLabResult<ExecOutput> {
        Err(ChaosLabError::transport_error("no sandbox backend in tests"))
    }

    async fn write_file(
        &self,
        _handle: &SandboxHandle,
        _path: &str,
        _contents: &str,
    ) -> ChaosLabResult<()> {
        Err(ChaosLabError::transport_error("no sandbox backend in tests"))
    }

    async fn destroy(&self, _handle: &SandboxHandle) -> ChaosLabResult<()> {
        Ok(())
    }
}

pub fn mock_container(archive: Arc<MemoryArchive>) -> ServiceContainer {
    ServiceContainer::new(
        Arc::new(UnavailableSandboxProvider),
        Arc::new(StaticAnalysis::default()),
        Arc::new(StaticDashboard),
        archive,
    )
}

/// What the sandbox answers at one sampling tick
#[derive(Debug, Clone, Copy)]
pub enum Tick {
    Reading {
        cpu: Option<f64>,
        memory: Option<f64>,
        errors: Option<u64>,
    },
    Unreachable,
}

impl Tick {
    pub fn ok(cpu: f64, memory: f64, errors: u64) -> Self {
        Tick::Reading {
            cpu: Some(cpu),
            memory: Some(memory),
            errors: Some(errors),
        }
    }
}

/// Sample source replaying one [`Tick`] per sampling round; the last tick repeats
pub struct ScriptedSampleSource {
    ticks: Vec<Tick>,
    cpu_calls: AtomicUsize,
    memory_calls: AtomicUsize,
    error_calls: AtomicUsize,
}

impl ScriptedSampleSource {
    pub fn new(ticks: Vec<Tick>) -> Self {
        assert!(!ticks.is_empty(), "at least one tick is required");
        Self {
            ticks,
            cpu_calls: AtomicUsize::new(0),
            memory_calls: AtomicUsize::new(0),
            error_calls: AtomicUsize::new(0),
        }
    }

    fn tick(&self, counter: &AtomicUsize) -> Tick {
        let index = counter.fetch_add(1, Ordering::SeqCst);
        self.ticks[index.min(self.ticks.len() - 1)]
    }

    pub fn rounds(&self) -> usize {
        self.cpu_calls.load(Ordering::SeqCst)
    }
}

fn unreachable_error() -> ChaosLabError {
    ChaosLabError::transport_error("sandbox unreachable")
}

#[async_trait]
impl SampleSource for ScriptedSampleSource {
    async fn cpu_percent(&self) -> ChaosLabResult<Option<f64>> {
        match self.tick(&self.cpu_calls) {
            Tick::Reading { cpu, .. } => Ok(cpu),
            Tick::Unreachable => Err(unreachable_error()),
        }
    }

    async fn memory_percent(&self) -> ChaosLabResult<Option<f64>> {
        match self.tick(&self.memory_calls) {
            Tick::Reading { memory, .. } => Ok(memory),
            Tick::Unreachable => Err(unreachable_error()),
        }
    }

    async fn error_count(&self) -> ChaosLabResult<Option<u64>> {
        match self.tick(&self.error_calls) {
            Tick::Reading { errors, .. } => Ok(errors),
            Tick::Unreachable => Err(unreachable_error()),
        }
    }
}

/// Records every checkpoint a run reports
#[derive(Default)]
pub struct RecordingProgress {
    seen: Mutex<Vec<RunCheckpoint>>,
}

impl RecordingProgress {
    pub fn seen(&self) -> Vec<RunCheckpoint> {
        self.seen.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingProgress {
    fn checkpoint(&self, checkpoint: RunCheckpoint) {
        self.seen.lock().unwrap().push(checkpoint);
    }
}

/// How the fault script behaves when the runner executes it
#[derive(Debug, Clone, Copy)]
pub enum FaultBehavior {
    /// Runs for the experiment duration and exits 0
    Completes,
    /// Sandbox drops out `after` into the run
    Vanishes { after: Duration },
    /// Never finishes; the exec times out at the script deadline
    Overruns,
}

/// Sandbox provider answering the runner's commands from a script, counting teardowns
pub struct ScriptedSandbox {
    create_failures: Mutex<Vec<ChaosLabError>>,
    python_available: bool,
    sampling_reachable: bool,
    fault: FaultBehavior,
    creates: AtomicUsize,
    destroyed: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn healthy() -> Self {
        Self {
            create_failures: Mutex::new(Vec::new()),
            python_available: true,
            sampling_reachable: true,
            fault: FaultBehavior::Completes,
            creates: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// The first `failures.len()` create calls fail with these errors, in order
    pub fn with_create_failures(self, failures: Vec<ChaosLabError>) -> Self {
        *self.create_failures.lock().unwrap() = failures;
        self
    }

    pub fn without_python(mut self) -> Self {
        self.python_available = false;
        self
    }

    pub fn with_unreachable_sampling(mut self) -> Self {
        self.sampling_reachable = false;
        self
    }

    pub fn with_fault(mut self, fault: FaultBehavior) -> Self {
        self.fault = fault;
        self
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Commands issued so far that contain `fragment`
    pub fn count(&self, fragment: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(fragment))
            .count()
    }

    fn sample_reply(&self, stdout: &str) -> ChaosLabResult<ExecOutput> {
        if self.sampling_reachable {
            Ok(ExecOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: 0,
            })
        } else {
            Err(unreachable_error())
        }
    }
}

fn exit_with(stdout: &str, exit_code: i32) -> ChaosLabResult<ExecOutput> {
    Ok(ExecOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code,
    })
}

#[async_trait]
impl SandboxProvider for ScriptedSandbox {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn create(&self) -> ChaosLabResult<SandboxHandle> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.create_failures.lock().unwrap();
        if !failures.is_empty() {
            return Err(failures.remove(0));
        }
        Ok(SandboxHandle::remote("sbx-scripted"))
    }

    async fn exec(
        &self,
        _handle: &SandboxHandle,
        command: &str,
        timeout: Duration,
    ) -> ChaosLabResult<ExecOutput> {
        self.commands.lock().unwrap().push(command.to_string());

        if command.starts_with("bash '") {
            return match self.fault {
                FaultBehavior::Completes => {
                    tokio::time::sleep(timeout.saturating_sub(FAULT_GRACE)).await;
                    exit_with("chaos completed\n", 0)
                }
                FaultBehavior::Vanishes { after } => {
                    tokio::time::sleep(after).await;
                    Err(unreachable_error())
                }
                FaultBehavior::Overruns => {
                    tokio::time::sleep(timeout).await;
                    Err(ChaosLabError::timeout_error(format!(
                        "command in sandbox sbx-scripted timed out after {}s",
                        timeout.as_secs()
                    )))
                }
            };
        }
        if command.contains("command -v python3") {
            return if self.python_available {
                exit_with("/usr/bin/python3\n", 0)
            } else {
                exit_with("", 1)
            };
        }
        if command.contains("echo started") {
            return exit_with("started\n", 0);
        }
        if command.contains("/health") {
            return exit_with("{\"status\": \"healthy\"}", 0);
        }
        if command.contains("tail -c") {
            return exit_with("ERROR - workload killed by chaos\n", 0);
        }
        if command.contains("mpstat") {
            return self.sample_reply("40.0\n");
        }
        if command.contains("free") {
            return self.sample_reply("50.00");
        }
        if command.contains("grep -c") {
            return self.sample_reply("1\n");
        }
        // Remaining CPU fallbacks only run if mpstat was rejected
        self.sample_reply("")
    }

    async fn write_file(
        &self,
        _handle: &SandboxHandle,
        _path: &str,
        _contents: &str,
    ) -> ChaosLabResult<()> {
        Ok(())
    }

    async fn destroy(&self, _handle: &SandboxHandle) -> ChaosLabResult<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
