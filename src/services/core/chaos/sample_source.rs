// src/services/core/chaos/sample_source.rs

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::services::core::sandbox::{ExecOutput, SandboxHandle, SandboxProvider};
use crate::utils::{parse_count, parse_finite_float, ChaosLabResult};

/// Raw readings for one sampling tick.
///
/// `Ok(None)` means the sandbox answered but the output was unusable;
/// `Err` means the sandbox could not be reached at all.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn cpu_percent(&self) -> ChaosLabResult<Option<f64>>;
    async fn memory_percent(&self) -> ChaosLabResult<Option<f64>>;
    async fn error_count(&self) -> ChaosLabResult<Option<u64>>;
}

/// CPU measurement methods, tried in order until one yields an acceptable value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuStrategy {
    /// `100 - %idle` from a one-second mpstat average
    Mpstat,
    /// Idle percentage from the second iteration of batch-mode top
    TopDoubleSample,
    /// Busy share of jiffies between two reads of /proc/stat
    ProcStat,
}

impl CpuStrategy {
    pub const DEFAULT_CHAIN: [CpuStrategy; 3] = [
        CpuStrategy::Mpstat,
        CpuStrategy::TopDoubleSample,
        CpuStrategy::ProcStat,
    ];

    pub fn command(&self) -> &'static str {
        match self {
            CpuStrategy::Mpstat => {
                "mpstat 1 1 2>/dev/null | awk '/Average/ && $NF ~ /^[0-9.]+$/ {print 100 - $NF}' | head -1"
            }
            CpuStrategy::TopDoubleSample => {
                "top -bn2 -d 0.5 2>/dev/null | grep -i 'cpu(s)' | tail -1"
            }
            CpuStrategy::ProcStat => "head -1 /proc/stat",
        }
    }

    /// Value a tool prints when it ran but measured nothing (e.g. mpstat on a fresh container)
    fn failure_sentinel(&self) -> Option<f64> {
        match self {
            CpuStrategy::Mpstat | CpuStrategy::TopDoubleSample => Some(0.0),
            CpuStrategy::ProcStat => None,
        }
    }

    fn accepts(&self, value: f64) -> bool {
        value.is_finite()
            && self
                .failure_sentinel()
                .map_or(true, |sentinel| (value - sentinel).abs() > f64::EPSILON)
    }
}

/// Cumulative jiffies from the aggregate `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStatSnapshot {
    pub total: u64,
    pub idle: u64,
}

impl ProcStatSnapshot {
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        if fields.next()? != "cpu" {
            return None;
        }
        let values: Vec<u64> = fields.map_while(|f| f.parse::<u64>().ok()).collect();
        if values.len() < 4 {
            return None;
        }
        // user nice system idle iowait ...
        Some(Self {
            total: values.iter().sum(),
            idle: values[3],
        })
    }

    /// Busy percentage since `previous`; `None` when no time elapsed
    pub fn busy_percent_since(&self, previous: &ProcStatSnapshot) -> Option<f64> {
        let total = self.total.checked_sub(previous.total)?;
        let idle = self.idle.checked_sub(previous.idle)?;
        if total == 0 {
            return None;
        }
        Some(100.0 * (1.0 - idle as f64 / total as f64))
    }
}

/// Extracts `100 - idle` from a top summary line such as
/// `%Cpu(s):  3.1 us,  1.0 sy,  0.0 ni, 95.6 id, ...`
pub fn parse_top_cpu_line(line: &str) -> Option<f64> {
    let idle_pattern = Regex::new(r"([0-9]+(?:[.,][0-9]+)?)\s*%?\s*id").ok()?;
    let captured = idle_pattern.captures(line)?.get(1)?.as_str().replace(',', ".");
    let idle = parse_finite_float(&captured)?;
    Some(100.0 - idle)
}

/// Reads metrics from a live sandbox through shell probes
pub struct SandboxSampleSource {
    provider: Arc<dyn SandboxProvider>,
    handle: SandboxHandle,
    log_paths: Vec<String>,
    error_marker: String,
    cpu_chain: Vec<CpuStrategy>,
    probe_timeout: Duration,
    proc_stat_baseline: Mutex<Option<ProcStatSnapshot>>,
}

impl SandboxSampleSource {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        handle: SandboxHandle,
        log_path: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            handle,
            log_paths: vec![log_path.into()],
            error_marker: "ERROR".to_string(),
            cpu_chain: CpuStrategy::DEFAULT_CHAIN.to_vec(),
            probe_timeout: Duration::from_secs(10),
            proc_stat_baseline: Mutex::new(None),
        }
    }

    /// Also count error lines written to `path`
    pub fn with_extra_log(mut self, path: impl Into<String>) -> Self {
        self.log_paths.push(path.into());
        self
    }

    pub fn with_cpu_chain(mut self, chain: Vec<CpuStrategy>) -> Self {
        self.cpu_chain = chain;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    async fn run(&self, command: &str) -> ChaosLabResult<ExecOutput> {
        self.provider
            .exec(&self.handle, command, self.probe_timeout)
            .await
    }

    fn interpret_cpu(&self, strategy: CpuStrategy, stdout: &str) -> Option<f64> {
        match strategy {
            CpuStrategy::Mpstat => parse_finite_float(stdout),
            CpuStrategy::TopDoubleSample => parse_top_cpu_line(stdout),
            CpuStrategy::ProcStat => {
                let current = ProcStatSnapshot::parse(stdout.lines().next()?)?;
                let mut baseline = self.proc_stat_baseline.lock().ok()?;
                let previous = baseline.replace(current);
                // First read only establishes the baseline
                previous.and_then(|prev| current.busy_percent_since(&prev))
            }
        }
    }
}

#[async_trait]
impl SampleSource for SandboxSampleSource {
    async fn cpu_percent(&self) -> ChaosLabResult<Option<f64>> {
        let mut transport_error = None;
        let mut reached = false;

        for strategy in &self.cpu_chain {
            match self.run(strategy.command()).await {
                Ok(output) => {
                    reached = true;
                    if let Some(value) = self.interpret_cpu(*strategy, &output.stdout) {
                        if strategy.accepts(value) {
                            return Ok(Some(value));
                        }
                    }
                }
                Err(e) => transport_error = Some(e),
            }
        }

        match transport_error {
            Some(e) if !reached => Err(e),
            _ => Ok(None),
        }
    }

    async fn memory_percent(&self) -> ChaosLabResult<Option<f64>> {
        let output = self
            .run("free | awk '/^Mem:/ {if ($2 > 0) printf \"%.2f\", ($3/$2) * 100.0}'")
            .await?;
        Ok(parse_finite_float(&output.stdout))
    }

    async fn error_count(&self) -> ChaosLabResult<Option<u64>> {
        let files: Vec<String> = self.log_paths.iter().map(|p| format!("'{}'", p)).collect();
        let command = format!(
            "cat {} 2>/dev/null | grep -c '{}'",
            files.join(" "),
            self.error_marker
        );
        let output = self.run(&command).await?;
        // grep exits 1 for zero matches (still prints 0) and 2 on a read error
        if output.exit_code > 1 {
            return Ok(None);
        }
        Ok(parse_count(&output.stdout))
    }
}
