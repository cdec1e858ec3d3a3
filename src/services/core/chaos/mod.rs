// src/services/core/chaos/mod.rs

//! Chaos Engineering Module
//!
//! Runs a fault scenario against a sample workload inside one or more
//! sandboxes and records what the workload did while under stress.
//!
//! ## Components
//! - **SampleSource**: shell probes for CPU, memory and error count
//! - **TimelineCollector**: fixed-cadence sampling into a timeline, plus summary metrics
//! - **Workload**: the sample service and the per-scenario fault scripts
//! - **ChaosRunner**: one provision, deploy, chaos and teardown cycle
//! - **InstanceAverager**: parallel instances averaged into one result

pub mod chaos_runner;
pub mod instance_averager;
pub mod sample_source;
pub mod timeline_collector;
pub mod workload;

pub use chaos_runner::{
    ChaosRunner, InstanceRun, InstanceRunner, NoopProgress, ProgressReporter, RunCheckpoint,
    RunnerConfig,
};
pub use instance_averager::{
    average_metrics, average_runs, average_timelines, CollectedRun, InstanceAverager,
};
pub use sample_source::{CpuStrategy, SampleSource, SandboxSampleSource};
pub use timeline_collector::{detect_recovery_time, summarize, CollectorConfig, TimelineCollector};
pub use workload::{FaultScript, IntensityProfile};
