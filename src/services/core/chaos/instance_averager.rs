// src/services/core/chaos/instance_averager.rs

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use super::chaos_runner::{InstanceRun, InstanceRunner, ProgressReporter};
use super::timeline_collector::summarize;
use crate::types::{ExperimentConfig, RunMetrics, Sample, Timeline};
use crate::utils::{mean, truncate_utf8, ChaosLabError, ChaosLabResult, Logger};

/// Bytes of each instance's log kept in the combined log
pub const PER_INSTANCE_LOG_BYTES: usize = 500;

/// Timeline, metrics and logs of an experiment's run phase, from one instance or averaged over several
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedRun {
    pub timeline: Timeline,
    pub metrics: RunMetrics,
    /// Instances that produced a timeline
    pub num_instances: u32,
    pub logs: String,
    pub instance_timelines: Option<Vec<Timeline>>,
}

impl CollectedRun {
    pub fn from_single(run: InstanceRun) -> Self {
        Self {
            metrics: summarize(&run.timeline),
            timeline: run.timeline,
            num_instances: 1,
            logs: run.logs,
            instance_timelines: None,
        }
    }
}

/// Runs several independent instances of one experiment and averages what succeeded
pub struct InstanceAverager {
    runner: Arc<dyn InstanceRunner>,
    max_parallel: usize,
    retain_instance_timelines: bool,
    logger: Logger,
}

impl InstanceAverager {
    pub fn new(
        runner: Arc<dyn InstanceRunner>,
        max_parallel: usize,
        retain_instance_timelines: bool,
        logger: Logger,
    ) -> Self {
        Self {
            runner,
            max_parallel: max_parallel.max(1),
            retain_instance_timelines,
            logger,
        }
    }

    /// Runs `config.num_instances` instances, at most `max_parallel` at a time.
    ///
    /// Individual failures are logged and excluded; the call fails only when no
    /// instance produced a timeline.
    pub async fn run_parallel(
        &self,
        experiment_id: &str,
        config: &ExperimentConfig,
        progress: &dyn ProgressReporter,
    ) -> ChaosLabResult<CollectedRun> {
        let requested = config.num_instances.max(1) as usize;
        let runner = &self.runner;

        let mut results: Vec<(usize, ChaosLabResult<InstanceRun>)> = stream::iter(0..requested)
            .map(move |instance| async move {
                let result = runner.run(experiment_id, config, instance, progress).await;
                (instance, result)
            })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;
        results.sort_by_key(|(instance, _)| *instance);

        let mut successes: Vec<(usize, InstanceRun)> = Vec::with_capacity(requested);
        let mut failures = Vec::new();
        for (instance, result) in results {
            match result {
                Ok(run) => successes.push((instance, run)),
                Err(e) => {
                    self.logger.warn_with_meta(
                        "Instance excluded from average",
                        Some(&serde_json::json!({ "instance": instance, "error": e.message })),
                    );
                    failures.push(format!("instance {}: {}", instance + 1, e.message));
                }
            }
        }

        if successes.is_empty() {
            return Err(ChaosLabError::sandbox_error(format!(
                "All {} instances failed: {}",
                requested,
                failures.join("; ")
            )));
        }

        self.logger.info_with_meta(
            "Parallel instances finished",
            Some(&serde_json::json!({
                "requested": requested,
                "succeeded": successes.len(),
                "failed": failures.len(),
            })),
        );

        let mut collected = average_runs(&successes)?;
        if self.retain_instance_timelines {
            collected.instance_timelines =
                Some(successes.into_iter().map(|(_, run)| run.timeline).collect());
        }
        Ok(collected)
    }
}

/// Averages successful instance runs, tagged with their zero-based instance index
pub fn average_runs(successes: &[(usize, InstanceRun)]) -> ChaosLabResult<CollectedRun> {
    if successes.is_empty() {
        return Err(ChaosLabError::internal_error(
            "Cannot average zero instance runs",
        ));
    }

    let timelines: Vec<&Timeline> = successes.iter().map(|(_, run)| &run.timeline).collect();
    let per_instance: Vec<RunMetrics> = timelines.iter().map(|t| summarize(t)).collect();

    Ok(CollectedRun {
        timeline: average_timelines(&timelines)?,
        metrics: average_metrics(&per_instance),
        num_instances: successes.len() as u32,
        logs: combine_logs(successes),
        instance_timelines: None,
    })
}

/// Index-aligned mean of several timelines.
///
/// Position `k` averages every timeline that has a `k`-th sample; its offset
/// comes from the first such timeline. Error counts are rounded and kept
/// non-decreasing.
pub fn average_timelines(timelines: &[&Timeline]) -> ChaosLabResult<Timeline> {
    let longest = timelines.iter().map(|t| t.len()).max().unwrap_or(0);
    let mut averaged: Vec<Sample> = Vec::with_capacity(longest);
    let mut previous_errors = 0u64;

    for index in 0..longest {
        let present: Vec<&Sample> = timelines.iter().filter_map(|t| t.get(index)).collect();
        let Some(first) = present.first() else {
            continue;
        };

        let cpu: Vec<f64> = present.iter().map(|s| s.cpu_percent).collect();
        let memory: Vec<f64> = present.iter().map(|s| s.memory_percent).collect();
        let errors: Vec<f64> = present
            .iter()
            .map(|s| s.cumulative_error_count as f64)
            .collect();

        let error_count = (mean(&errors).unwrap_or(0.0).round() as u64).max(previous_errors);
        previous_errors = error_count;

        averaged.push(Sample::new(
            first.time_offset,
            mean(&cpu).unwrap_or(0.0),
            mean(&memory).unwrap_or(0.0),
            error_count,
        ));
    }

    Timeline::from_samples(averaged)
}

/// Mean of per-instance peaks and totals. Recovery time is not averaged.
pub fn average_metrics(per_instance: &[RunMetrics]) -> RunMetrics {
    let cpu: Vec<f64> = per_instance.iter().map(|m| m.cpu_peak).collect();
    let memory: Vec<f64> = per_instance.iter().map(|m| m.memory_peak).collect();
    let errors: Vec<f64> = per_instance.iter().map(|m| m.total_errors as f64).collect();

    RunMetrics {
        cpu_peak: mean(&cpu).unwrap_or(0.0),
        memory_peak: mean(&memory).unwrap_or(0.0),
        total_errors: mean(&errors).unwrap_or(0.0).round() as u64,
        recovery_time_seconds: None,
    }
}

fn combine_logs(successes: &[(usize, InstanceRun)]) -> String {
    successes
        .iter()
        .map(|(instance, run)| {
            format!(
                "--- Instance {} ---\n{}",
                instance + 1,
                truncate_utf8(&run.logs, PER_INSTANCE_LOG_BYTES)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
