// src/services/core/ai/analysis_fallback.rs

//! Rule-based analysis used whenever the remote model is unavailable or
//! returns something unusable. Deterministic: the same metrics always
//! produce the same result.

use crate::types::{AnalysisResult, AnalysisSource, ChaosScenario, RunMetrics, Severity};

pub const HIGH_ERROR_THRESHOLD: u64 = 10;
pub const MEDIUM_ERROR_THRESHOLD: u64 = 5;
pub const HIGH_RESOURCE_THRESHOLD: f64 = 80.0;
pub const MEDIUM_RESOURCE_THRESHOLD: f64 = 60.0;

/// Severity from error count and resource peaks
pub fn classify_severity(metrics: &RunMetrics) -> Severity {
    if metrics.total_errors > HIGH_ERROR_THRESHOLD
        || metrics.cpu_peak > HIGH_RESOURCE_THRESHOLD
        || metrics.memory_peak > HIGH_RESOURCE_THRESHOLD
    {
        Severity::High
    } else if metrics.total_errors > MEDIUM_ERROR_THRESHOLD
        || metrics.cpu_peak > MEDIUM_RESOURCE_THRESHOLD
        || metrics.memory_peak > MEDIUM_RESOURCE_THRESHOLD
    {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn scenario_recommendations(scenario: ChaosScenario) -> [&'static str; 2] {
    match scenario {
        ChaosScenario::NetworkDelay => [
            "Set explicit client timeouts on every outbound call",
            "Serve cached or degraded responses when upstream latency exceeds budget",
        ],
        ChaosScenario::MemoryPressure => [
            "Bound in-memory caches and request payload sizes",
            "Set container memory limits with headroom and alert before the limit",
        ],
        ChaosScenario::DiskFull => [
            "Rotate and cap log files, and alert on filesystem usage",
            "Handle write failures explicitly instead of crashing the request",
        ],
        ChaosScenario::ProcessKill => [
            "Run the service under a supervisor that restarts it automatically",
            "Make startup fast and idempotent so restarts recover quickly",
        ],
        ChaosScenario::DependencyFailure => [
            "Add a circuit breaker around the failing dependency",
            "Return a graceful fallback response while the dependency is down",
        ],
    }
}

/// Canned advice: two scenario-specific items followed by two general ones
pub fn recommendations_for(scenario: ChaosScenario) -> Vec<String> {
    scenario_recommendations(scenario)
        .into_iter()
        .chain([
            "Implement retry logic with exponential backoff",
            "Monitor resource usage and set up alerts",
        ])
        .map(str::to_string)
        .collect()
}

pub fn fallback_analysis(scenario: ChaosScenario, metrics: &RunMetrics) -> AnalysisResult {
    let recovery = match metrics.recovery_time_seconds {
        Some(seconds) => format!(" Resource usage recovered after {:.0}s.", seconds),
        None => " No spike-then-recovery transition was observed.".to_string(),
    };

    AnalysisResult {
        summary: format!(
            "Application experienced {} scenario. Recorded {} errors with peak CPU at {:.1}% and memory at {:.1}%.{}",
            scenario.display_name(),
            metrics.total_errors,
            metrics.cpu_peak,
            metrics.memory_peak,
            recovery
        ),
        metrics: metrics.clone(),
        severity: classify_severity(metrics),
        recommendations: recommendations_for(scenario),
        source: AnalysisSource::Fallback,
    }
}
