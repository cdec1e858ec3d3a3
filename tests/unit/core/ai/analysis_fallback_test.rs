// Rule-based analysis: thresholds, recommendations and determinism

use chaos_lab::services::core::ai::{classify_severity, fallback_analysis, recommendations_for};
use chaos_lab::types::{AnalysisSource, ChaosScenario, RunMetrics, Severity};

fn metrics(cpu_peak: f64, memory_peak: f64, total_errors: u64) -> RunMetrics {
    RunMetrics {
        cpu_peak,
        memory_peak,
        total_errors,
        recovery_time_seconds: None,
    }
}

#[test]
fn test_severity_boundaries_are_exclusive() {
    assert_eq!(classify_severity(&metrics(60.0, 60.0, 5)), Severity::Low);
    assert_eq!(classify_severity(&metrics(60.1, 10.0, 0)), Severity::Medium);
    assert_eq!(classify_severity(&metrics(10.0, 10.0, 6)), Severity::Medium);
    assert_eq!(classify_severity(&metrics(80.0, 80.0, 10)), Severity::Medium);
    assert_eq!(classify_severity(&metrics(10.0, 80.5, 0)), Severity::High);
    assert_eq!(classify_severity(&metrics(10.0, 10.0, 11)), Severity::High);
}

#[test]
fn test_high_error_count_dominates_low_resources() {
    let analysis = fallback_analysis(ChaosScenario::DependencyFailure, &metrics(5.0, 20.0, 40));
    assert_eq!(analysis.severity, Severity::High);
}

#[test]
fn test_every_scenario_gets_four_recommendations() {
    for scenario in ChaosScenario::ALL {
        let recommendations = recommendations_for(scenario);
        assert_eq!(recommendations.len(), 4, "{}", scenario.as_str());
        assert_eq!(
            recommendations[2],
            "Implement retry logic with exponential backoff"
        );
        assert_eq!(recommendations[3], "Monitor resource usage and set up alerts");
    }
}

#[test]
fn test_scenario_specific_advice_differs() {
    assert_ne!(
        recommendations_for(ChaosScenario::NetworkDelay)[0],
        recommendations_for(ChaosScenario::DiskFull)[0]
    );
}

#[test]
fn test_fallback_is_deterministic_and_marked() {
    let mut input = metrics(72.5, 64.0, 7);
    input.recovery_time_seconds = Some(25.0);

    let first = fallback_analysis(ChaosScenario::ProcessKill, &input);
    let second = fallback_analysis(ChaosScenario::ProcessKill, &input);

    assert_eq!(first, second);
    assert_eq!(first.source, AnalysisSource::Fallback);
    assert_eq!(first.metrics, input);
    assert!(first.summary.contains("7 errors"));
    assert!(first.summary.contains("72.5%"));
    assert!(first.summary.contains("recovered after 25s"));
}

#[test]
fn test_summary_mentions_missing_recovery() {
    let analysis = fallback_analysis(ChaosScenario::MemoryPressure, &metrics(90.0, 95.0, 0));
    assert!(analysis.summary.contains("No spike-then-recovery"));
}
