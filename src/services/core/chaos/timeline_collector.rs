// src/services/core/chaos/timeline_collector.rs

//! Periodic sampling of a sandbox into a [`Timeline`], plus the summary
//! metrics derived from a finished timeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use super::sample_source::SampleSource;
use crate::types::{RunMetrics, Sample, Timeline};
use crate::utils::{clamp_percent, ChaosLabError, ChaosLabResult, Logger};

/// A sample below both thresholds counts as recovered
pub const RECOVERY_CPU_THRESHOLD: f64 = 30.0;
pub const RECOVERY_MEMORY_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub sample_interval_seconds: u64,
    /// Consecutive unreachable ticks spanning this long abort the run
    pub unreachable_window_seconds: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            sample_interval_seconds: 5,
            unreachable_window_seconds: 30,
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> ChaosLabResult<()> {
        if self.sample_interval_seconds == 0 {
            return Err(ChaosLabError::config_error(
                "sample_interval_seconds must be greater than 0",
            ));
        }
        if self.unreachable_window_seconds < self.sample_interval_seconds {
            return Err(ChaosLabError::config_error(
                "unreachable_window_seconds must cover at least one sample interval",
            ));
        }
        Ok(())
    }
}

/// Values read during one tick, before substitution
struct TickReadings {
    cpu: Option<f64>,
    memory: Option<f64>,
    errors: Option<u64>,
    reachable: bool,
}

pub struct TimelineCollector {
    config: CollectorConfig,
    logger: Logger,
}

impl TimelineCollector {
    pub fn new(config: CollectorConfig, logger: Logger) -> Self {
        Self { config, logger }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Number of samples taken for a run: offsets 0, I, 2I, ... up to the first one at or past D
    pub fn expected_sample_count(&self, duration_seconds: u64) -> usize {
        let interval = self.config.sample_interval_seconds.max(1);
        (duration_seconds.div_ceil(interval) + 1) as usize
    }

    /// Samples `source` on a fixed cadence for `duration`.
    ///
    /// Sampling stops early, returning what was gathered, once `cancel` flips to true.
    /// Unusable readings are replaced by the previous tick's value; a sandbox that stays
    /// unreachable for the whole unreachable window fails the collection.
    pub async fn collect(
        &self,
        source: &dyn SampleSource,
        duration: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> ChaosLabResult<Timeline> {
        let interval = self.config.sample_interval_seconds.max(1);
        let total = self.expected_sample_count(duration.as_secs());
        let started = Instant::now();

        let mut samples: Vec<Sample> = Vec::with_capacity(total);
        let mut last_cpu = 0.0;
        let mut last_memory = 0.0;
        let mut last_errors = 0u64;
        let mut unreachable_since: Option<u64> = None;

        for tick in 0..total {
            let offset = tick as u64 * interval;

            tokio::select! {
                _ = tokio::time::sleep_until(started + Duration::from_secs(offset)) => {}
                _ = cancelled(&mut cancel) => {
                    self.logger.info_with_meta(
                        "Sampling cancelled",
                        Some(&serde_json::json!({ "samples": samples.len(), "at_offset": offset })),
                    );
                    break;
                }
            }

            let readings = read_tick(source).await;

            if readings.reachable {
                unreachable_since = None;
            } else {
                let since = *unreachable_since.get_or_insert(offset);
                self.logger.warn_with_meta(
                    "Sandbox unreachable during sampling",
                    Some(&serde_json::json!({ "offset": offset, "since": since })),
                );
                if offset - since >= self.config.unreachable_window_seconds {
                    return Err(ChaosLabError::transport_error(format!(
                        "Sandbox unreachable for {}s during sampling",
                        offset - since
                    )));
                }
            }

            last_cpu = readings.cpu.map(clamp_percent).unwrap_or(last_cpu);
            last_memory = readings.memory.map(clamp_percent).unwrap_or(last_memory);
            // Counter never goes backwards, even if the log was rotated or truncated
            last_errors = readings.errors.map_or(last_errors, |n| n.max(last_errors));

            samples.push(Sample::new(offset, last_cpu, last_memory, last_errors));
        }

        self.logger.debug_with_meta(
            "Sampling finished",
            Some(&serde_json::json!({ "samples": samples.len(), "expected": total })),
        );
        Timeline::from_samples(samples)
    }
}

async fn read_tick(source: &dyn SampleSource) -> TickReadings {
    let (cpu, memory, errors) = tokio::join!(
        source.cpu_percent(),
        source.memory_percent(),
        source.error_count()
    );
    let reachable = cpu.is_ok() || memory.is_ok() || errors.is_ok();
    TickReadings {
        cpu: cpu.ok().flatten(),
        memory: memory.ok().flatten(),
        errors: errors.ok().flatten(),
        reachable,
    }
}

/// Resolves once the flag is set; never resolves if the sender is dropped unset
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let outcome = cancel.wait_for(|flag| *flag).await.map(|_| ());
    if outcome.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Peak and error summary of a single timeline
pub fn summarize(timeline: &Timeline) -> RunMetrics {
    RunMetrics {
        cpu_peak: timeline.iter().map(|s| s.cpu_percent).fold(0.0, f64::max),
        memory_peak: timeline.iter().map(|s| s.memory_percent).fold(0.0, f64::max),
        total_errors: timeline.last().map_or(0, |s| s.cumulative_error_count),
        recovery_time_seconds: detect_recovery_time(timeline),
    }
}

/// Offset of the first sample back under both recovery thresholds after a spike.
///
/// A spike is any earlier sample above either threshold. Returns `None` when the
/// timeline never spiked or never came back down.
pub fn detect_recovery_time(timeline: &Timeline) -> Option<f64> {
    let mut spiked = false;
    for sample in timeline.iter() {
        if spiked
            && sample.cpu_percent < RECOVERY_CPU_THRESHOLD
            && sample.memory_percent < RECOVERY_MEMORY_THRESHOLD
        {
            return Some(sample.time_offset as f64);
        }
        if sample.cpu_percent > RECOVERY_CPU_THRESHOLD
            || sample.memory_percent > RECOVERY_MEMORY_THRESHOLD
        {
            spiked = true;
        }
    }
    None
}
