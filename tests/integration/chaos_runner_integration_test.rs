// Single-instance orchestration through ChaosRunner against a scripted sandbox

#[path = "../common/mock_services.rs"]
mod mock_services;

use std::sync::Arc;
use std::time::Duration;

use chaos_lab::services::core::chaos::{ChaosRunner, InstanceRunner, RunCheckpoint, RunnerConfig};
use chaos_lab::types::{ChaosScenario, ExperimentConfig, Intensity};
use chaos_lab::utils::{ChaosLabError, ErrorKind};
use mock_services::*;
use tokio::time::Instant;
use tokio_test::assert_ok;

fn runner(sandbox: &Arc<ScriptedSandbox>) -> ChaosRunner {
    ChaosRunner::new(sandbox.clone(), RunnerConfig::default(), quiet_logger())
}

fn config(duration_seconds: u32) -> ExperimentConfig {
    ExperimentConfig::new(ChaosScenario::NetworkDelay, duration_seconds, Intensity::Low)
}

#[tokio::test(start_paused = true)]
async fn test_successful_run_reports_every_checkpoint_and_tears_down() {
    let sandbox = Arc::new(ScriptedSandbox::healthy());
    let progress = RecordingProgress::default();

    let run = runner(&sandbox)
        .run("exp_a1b2c3d4", &config(10), 0, &progress)
        .await
        .unwrap();

    let seen = progress.seen();
    assert_eq!(
        seen,
        vec![
            RunCheckpoint::Provisioning,
            RunCheckpoint::SandboxReady,
            RunCheckpoint::WorkloadDeployed,
            RunCheckpoint::ChaosComplete,
        ]
    );
    let percents: Vec<u8> = seen.iter().map(|c| c.progress_percent()).collect();
    assert_eq!(percents, vec![10, 30, 50, 70]);

    let offsets: Vec<u64> = run.timeline.iter().map(|s| s.time_offset).collect();
    assert_eq!(offsets, vec![0, 5, 10]);
    let first = run.timeline.samples()[0];
    assert_eq!(first.cpu_percent, 40.0);
    assert_eq!(first.memory_percent, 50.0);
    assert_eq!(first.cumulative_error_count, 1);
    assert_eq!(run.logs, "ERROR - workload killed by chaos\n");

    assert_eq!(sandbox.creates(), 1);
    assert_eq!(sandbox.destroyed(), 1);
    assert_eq!(sandbox.count("bash '"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deploy_failure_still_destroys_sandbox() {
    let sandbox = Arc::new(ScriptedSandbox::healthy().without_python());
    let progress = RecordingProgress::default();

    let err = runner(&sandbox)
        .run("exp_a1b2c3d4", &config(10), 0, &progress)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::SandboxError);
    assert!(err.message.contains("python3"));
    assert_eq!(
        progress.seen(),
        vec![RunCheckpoint::Provisioning, RunCheckpoint::SandboxReady]
    );
    assert_eq!(sandbox.count("bash '"), 0);
    assert_eq!(sandbox.destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_sampling_fails_run_and_destroys_sandbox() {
    let sandbox = Arc::new(ScriptedSandbox::healthy().with_unreachable_sampling());
    let progress = RecordingProgress::default();

    let err = runner(&sandbox)
        .run("exp_a1b2c3d4", &config(60), 0, &progress)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::TransportError);
    assert!(err.message.contains("unreachable for 30s"));
    assert!(!progress.seen().contains(&RunCheckpoint::ChaosComplete));
    assert_eq!(sandbox.count("tail -c"), 0);
    assert_eq!(sandbox.destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_vanished_sandbox_stops_sampling_early() {
    let sandbox = Arc::new(ScriptedSandbox::healthy().with_fault(FaultBehavior::Vanishes {
        after: Duration::from_secs(7),
    }));
    let progress = RecordingProgress::default();
    let started = Instant::now();

    let err = runner(&sandbox)
        .run("exp_a1b2c3d4", &config(60), 0, &progress)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::TransportError);
    // Samples at 0s and 5s only; the fault failed at 7s
    assert_eq!(sandbox.count("mpstat"), 2);
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(!progress.seen().contains(&RunCheckpoint::ChaosComplete));
    assert_eq!(sandbox.destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fault_script_overrun_keeps_the_timeline() {
    let sandbox = Arc::new(ScriptedSandbox::healthy().with_fault(FaultBehavior::Overruns));
    let progress = RecordingProgress::default();

    let run = runner(&sandbox)
        .run("exp_a1b2c3d4", &config(10), 0, &progress)
        .await
        .unwrap();

    assert_eq!(run.timeline.len(), 3);
    assert_eq!(progress.seen().last(), Some(&RunCheckpoint::ChaosComplete));
    assert_eq!(sandbox.destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_create_failures_are_retried() {
    let sandbox = Arc::new(ScriptedSandbox::healthy().with_create_failures(vec![
        ChaosLabError::transport_error("connection reset"),
        ChaosLabError::timeout_error("create timed out"),
    ]));

    assert_ok!(
        runner(&sandbox)
            .run("exp_a1b2c3d4", &config(10), 0, &RecordingProgress::default())
            .await
    );
    assert_eq!(sandbox.creates(), 3);
    assert_eq!(sandbox.destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_create_fails_without_teardown() {
    let sandbox = Arc::new(
        ScriptedSandbox::healthy()
            .with_create_failures(vec![ChaosLabError::sandbox_error("invalid API key")]),
    );
    let progress = RecordingProgress::default();

    let err = runner(&sandbox)
        .run("exp_a1b2c3d4", &config(10), 0, &progress)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::SandboxError);
    assert!(err.message.starts_with("Failed to create sandbox after 3 attempt(s)"));
    assert!(err.message.contains("invalid API key"));
    assert_eq!(sandbox.creates(), 1);
    assert_eq!(sandbox.destroyed(), 0);
    assert_eq!(progress.seen(), vec![RunCheckpoint::Provisioning]);
}
