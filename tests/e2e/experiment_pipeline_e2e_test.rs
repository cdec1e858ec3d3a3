// End-to-end experiment lifecycle through ExperimentService with scripted collaborators

#[path = "../common/mock_services.rs"]
mod mock_services;

use std::sync::Arc;
use std::time::Duration;

use chaos_lab::services::core::chaos::InstanceRunner;
use chaos_lab::services::core::experiments::{ExperimentService, ExperimentServiceConfig};
use chaos_lab::types::{AnalysisSource, ChaosScenario, ExperimentConfig, ExperimentState, Intensity};
use chaos_lab::utils::ErrorKind;
use mock_services::*;
use tokio_test::{assert_err, assert_ok};

fn spiky_timeline() -> chaos_lab::types::Timeline {
    timeline_from(&[
        (0, 10.0, 30.0, 0),
        (5, 85.0, 70.0, 2),
        (10, 60.0, 55.0, 6),
        (15, 20.0, 40.0, 7),
    ])
}

fn service_with(runner: Arc<dyn InstanceRunner>, archive: Arc<MemoryArchive>) -> ExperimentService {
    ExperimentService::with_runner(
        mock_container(archive),
        runner,
        ExperimentServiceConfig::default(),
        quiet_logger(),
    )
    .unwrap()
}

/// Polls until the background task has reached the gated part of the run
async fn wait_for_progress(service: &ExperimentService, id: &str, target: u8) {
    for _ in 0..1000 {
        let status = service.get_status(id).await.unwrap();
        if status.progress_percent >= target {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("experiment {} never reached {}%", id, target);
}

#[tokio::test]
async fn test_single_instance_experiment_completes() {
    let archive = Arc::new(MemoryArchive::default());
    let runner = Arc::new(ScriptedRunner::succeeding(spiky_timeline()));
    let service = service_with(runner.clone(), archive.clone());

    let id = service
        .start(ExperimentConfig::new(
            ChaosScenario::MemoryPressure,
            30,
            Intensity::High,
        ))
        .await
        .unwrap();
    assert!(id.starts_with("exp_"));
    assert_eq!(id.len(), 12);

    assert_ok!(service.wait(&id).await);

    let status = service.get_status(&id).await.unwrap();
    assert_eq!(status.state, ExperimentState::Completed);
    assert_eq!(status.progress_percent, 100);

    let results = service.get_results(&id).await.unwrap();
    assert_eq!(results.num_instances, Some(1));
    assert_eq!(results.timeline.as_ref().map(|t| t.len()), Some(4));

    let metrics = results.metrics.clone().unwrap();
    assert_eq!(metrics.cpu_peak, 85.0);
    assert_eq!(metrics.memory_peak, 70.0);
    assert_eq!(metrics.total_errors, 7);
    assert_eq!(metrics.recovery_time_seconds, Some(15.0));

    let analysis = results.analysis.unwrap();
    assert_eq!(analysis.source, AnalysisSource::Fallback);
    assert_eq!(analysis.metrics, metrics);
    assert_eq!(
        results.dashboard_url.as_deref(),
        Some(format!("http://grafana.test/d/{}", id).as_str())
    );
    assert!(results.started_at.is_some());
    assert!(results.finished_at.is_some());

    assert_eq!(runner.calls(), 1);
    assert_eq!(archive.stored_ids(), vec![id]);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_results_wait_for_completion() {
    let archive = Arc::new(MemoryArchive::default());
    let runner = Arc::new(ScriptedRunner::succeeding(spiky_timeline()).gated());
    let service = service_with(runner.clone(), archive);

    let id = service
        .start(ExperimentConfig::new(
            ChaosScenario::NetworkDelay,
            20,
            Intensity::Low,
        ))
        .await
        .unwrap();

    wait_for_progress(&service, &id, 30).await;
    let status = service.get_status(&id).await.unwrap();
    assert_eq!(status.state, ExperimentState::Running);
    assert_eq!(status.progress_percent, 30);

    let early = service.get_results(&id).await.unwrap_err();
    assert_eq!(early.kind, ErrorKind::NotReady);

    runner.open_gate();
    let mut seen = vec![status.progress_percent];
    loop {
        let status = service.get_status(&id).await.unwrap();
        seen.push(status.progress_percent);
        if status.state.is_terminal() {
            assert_eq!(status.state, ExperimentState::Completed);
            break;
        }
        tokio::task::yield_now().await;
    }

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", seen);
    assert_eq!(seen.last(), Some(&100));
    assert!(seen[..seen.len() - 1].iter().all(|p| *p < 100));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_anything_runs() {
    let runner = Arc::new(ScriptedRunner::succeeding(spiky_timeline()));
    let service = service_with(runner.clone(), Arc::new(MemoryArchive::default()));

    let too_short = ExperimentConfig::new(ChaosScenario::DiskFull, 5, Intensity::Medium);
    let err = assert_err!(service.start(too_short).await);
    assert_eq!(err.kind, ErrorKind::ValidationError);

    let too_many = ExperimentConfig::new(ChaosScenario::DiskFull, 30, Intensity::Medium)
        .with_instances(6);
    let err = assert_err!(service.start(too_many).await);
    assert_eq!(err.kind, ErrorKind::ValidationError);

    assert!(service.list().await.is_empty());
    assert_eq!(runner.calls(), 0);
}

#[tokio::test]
async fn test_provisioning_failure_marks_experiment_failed() {
    let archive = Arc::new(MemoryArchive::default());
    let runner = Arc::new(ScriptedRunner::failing(
        "Failed to create sandbox after 3 attempt(s)",
    ));
    let service = service_with(runner, archive.clone());

    let id = service
        .start(ExperimentConfig::new(
            ChaosScenario::ProcessKill,
            30,
            Intensity::Medium,
        ))
        .await
        .unwrap();
    assert_ok!(service.wait(&id).await);

    let status = service.get_status(&id).await.unwrap();
    assert_eq!(status.state, ExperimentState::Failed);
    assert!(status.progress_percent < 100);
    assert!(status
        .message
        .unwrap()
        .contains("Failed to create sandbox after 3 attempt(s)"));

    let results = service.get_results(&id).await.unwrap();
    assert_eq!(results.state, ExperimentState::Failed);
    assert!(results.timeline.is_none());
    assert!(results.analysis.is_none());
    assert!(results.dashboard_url.is_none());
    assert!(archive.stored_ids().is_empty());
}

#[tokio::test]
async fn test_unknown_experiment_is_not_found() {
    let service = service_with(
        Arc::new(ScriptedRunner::succeeding(spiky_timeline())),
        Arc::new(MemoryArchive::default()),
    );

    assert_eq!(
        service.get_status("exp_deadbeef").await.unwrap_err().kind,
        ErrorKind::NotFoundError
    );
    assert_eq!(
        service.get_results("exp_deadbeef").await.unwrap_err().kind,
        ErrorKind::NotFoundError
    );
    assert_eq!(
        service.get_results("../../etc").await.unwrap_err().kind,
        ErrorKind::NotFoundError
    );
}

#[tokio::test]
async fn test_parallel_instances_exclude_failures() {
    let archive = Arc::new(MemoryArchive::default());
    let runner = Arc::new(
        ScriptedRunner::succeeding(timeline_from(&[(0, 90.0, 60.0, 0), (5, 10.0, 20.0, 4)]))
            .with_instance(1, timeline_from(&[(0, 10.0, 20.0, 2), (5, 70.0, 80.0, 6)]))
            .with_failed_instance(2, "sandbox unreachable"),
    );
    let service = service_with(runner.clone(), archive);

    let id = service
        .start(
            ExperimentConfig::new(ChaosScenario::DependencyFailure, 30, Intensity::Medium)
                .with_instances(3),
        )
        .await
        .unwrap();
    assert_ok!(service.wait(&id).await);

    let results = service.get_results(&id).await.unwrap();
    assert_eq!(results.state, ExperimentState::Completed);
    assert_eq!(results.num_instances, Some(2));
    assert_eq!(runner.calls(), 3);

    let timeline = results.timeline.unwrap();
    assert_eq!(timeline.samples()[0].cpu_percent, 50.0);
    assert_eq!(timeline.samples()[1].cpu_percent, 40.0);
    assert_eq!(timeline.samples()[1].cumulative_error_count, 5);

    // Peaks are averaged per instance, not read off the averaged series
    let metrics = results.metrics.unwrap();
    assert_eq!(metrics.cpu_peak, 80.0);
    assert_eq!(metrics.memory_peak, 70.0);
    assert_eq!(timeline.iter().map(|s| s.cpu_percent).fold(0.0, f64::max), 50.0);
    assert_eq!(metrics.recovery_time_seconds, None);
    assert!(results.raw_logs.unwrap().contains("--- Instance 2 ---"));
}

#[tokio::test]
async fn test_removed_experiment_is_served_from_archive() {
    let archive = Arc::new(MemoryArchive::default());
    let service = service_with(
        Arc::new(ScriptedRunner::succeeding(spiky_timeline())),
        archive,
    );

    let id = service
        .start(ExperimentConfig::new(
            ChaosScenario::DiskFull,
            10,
            Intensity::Low,
        ))
        .await
        .unwrap();
    assert_ok!(service.wait(&id).await);

    let removed = service.remove(&id).await.unwrap();
    assert_eq!(removed.state, ExperimentState::Completed);
    assert!(service.list().await.is_empty());
    assert_eq!(
        service.get_status(&id).await.unwrap_err().kind,
        ErrorKind::NotFoundError
    );

    let archived = service.get_results(&id).await.unwrap();
    assert_eq!(archived.id, id);
    assert_eq!(archived.progress_percent, 100);
}

#[tokio::test]
async fn test_running_experiment_cannot_be_removed() {
    let runner = Arc::new(ScriptedRunner::succeeding(spiky_timeline()).gated());
    let service = service_with(runner.clone(), Arc::new(MemoryArchive::default()));

    let id = service
        .start(ExperimentConfig::new(
            ChaosScenario::NetworkDelay,
            10,
            Intensity::Low,
        ))
        .await
        .unwrap();
    wait_for_progress(&service, &id, 30).await;

    assert_eq!(
        service.remove(&id).await.unwrap_err().kind,
        ErrorKind::NotReady
    );

    runner.open_gate();
    assert_ok!(service.wait(&id).await);
    assert_ok!(service.remove(&id).await);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_run_is_failed_by_the_time_limit() {
    let runner = Arc::new(ScriptedRunner::succeeding(spiky_timeline()).with_delay(Duration::from_secs(3600)));
    let config = ExperimentServiceConfig {
        timeout_grace_seconds: 5,
        ..ExperimentServiceConfig::default()
    };
    let service = ExperimentService::with_runner(
        mock_container(Arc::new(MemoryArchive::default())),
        runner,
        config,
        quiet_logger(),
    )
    .unwrap();

    let id = service
        .start(ExperimentConfig::new(
            ChaosScenario::MemoryPressure,
            10,
            Intensity::Low,
        ))
        .await
        .unwrap();
    assert_ok!(service.wait(&id).await);

    let status = service.get_status(&id).await.unwrap();
    assert_eq!(status.state, ExperimentState::Failed);
    assert_eq!(status.progress_percent, 50);
    assert!(status.message.unwrap().contains("25s time limit"));
}

#[tokio::test]
async fn test_health_reports_tracked_experiments() {
    let service = service_with(
        Arc::new(ScriptedRunner::succeeding(spiky_timeline())),
        Arc::new(MemoryArchive::default()),
    );
    let id = service
        .start(ExperimentConfig::new(
            ChaosScenario::ProcessKill,
            10,
            Intensity::Low,
        ))
        .await
        .unwrap();
    assert_ok!(service.wait(&id).await);

    let health = service.health().await;
    assert_eq!(health.sandbox_provider, "unavailable");
    assert_eq!(health.experiments_tracked, 1);
    assert!(health.dashboard_configured);
    assert!(!health.remote_analysis_configured);
}
