// src/services/core/infrastructure/grafana_dashboard.rs

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::config::DEFAULT_GRAFANA_URL;
use crate::types::{AnalysisResult, ExperimentConfig, RunMetrics, Timeline};
use crate::utils::time::offset_to_epoch_ms;
use crate::utils::{ChaosLabError, ChaosLabResult, Logger};

const SERVICE_NAME: &str = "grafana";
const TESTDATA_PLUGIN: &str = "grafana-testdata-datasource";

pub struct DashboardRequest<'a> {
    pub experiment_id: &'a str,
    pub config: &'a ExperimentConfig,
    pub timeline: &'a Timeline,
    pub metrics: &'a RunMetrics,
    pub analysis: &'a AnalysisResult,
    pub started_at: DateTime<Utc>,
}

/// Publishes a dashboard and returns its URL; a placeholder URL on any failure
#[async_trait]
pub trait DashboardService: Send + Sync {
    async fn publish(&self, request: &DashboardRequest<'_>) -> String;

    fn is_configured(&self) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub grafana_url: String,
    pub timeout_seconds: u64,
    /// UID of the TestData datasource the panels read from
    pub datasource_uid: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            grafana_url: DEFAULT_GRAFANA_URL.to_string(),
            timeout_seconds: 10,
            datasource_uid: "chaoslab-testdata".to_string(),
        }
    }
}

impl DashboardConfig {
    pub fn validate(&self) -> ChaosLabResult<()> {
        Url::parse(&self.grafana_url)?;
        if self.timeout_seconds == 0 {
            return Err(ChaosLabError::config_error(
                "Dashboard timeout_seconds must be greater than 0",
            ));
        }
        if self.datasource_uid.trim().is_empty() {
            return Err(ChaosLabError::config_error(
                "Dashboard datasource_uid must not be empty",
            ));
        }
        Ok(())
    }

    fn base(&self) -> &str {
        self.grafana_url.trim_end_matches('/')
    }
}

/// Deterministic URL handed out when no real dashboard could be created
pub fn placeholder_url(grafana_url: &str, experiment_id: &str) -> String {
    format!(
        "{}/d/chaoslab-{id}/chaos-experiment-{id}?placeholder=true",
        grafana_url.trim_end_matches('/'),
        id = experiment_id
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineField {
    Cpu,
    Memory,
    Errors,
}

impl TimelineField {
    fn column(&self) -> &'static str {
        match self {
            TimelineField::Cpu => "cpu_percent",
            TimelineField::Memory => "memory_percent",
            TimelineField::Errors => "cumulative_errors",
        }
    }
}

/// CSV for a TestData panel: absolute epoch-millisecond time column plus one value column
pub fn timeline_csv(timeline: &Timeline, started_at: DateTime<Utc>, field: TimelineField) -> String {
    let mut csv = format!("time,{}\n", field.column());
    for sample in timeline.iter() {
        let value = match field {
            TimelineField::Cpu => format!("{:.2}", sample.cpu_percent),
            TimelineField::Memory => format!("{:.2}", sample.memory_percent),
            TimelineField::Errors => sample.cumulative_error_count.to_string(),
        };
        csv.push_str(&format!(
            "{},{}\n",
            offset_to_epoch_ms(started_at, sample.time_offset),
            value
        ));
    }
    csv
}

fn datasource(uid: &str) -> Value {
    json!({ "type": TESTDATA_PLUGIN, "uid": uid })
}

fn threshold_steps(yellow: f64, red: f64) -> Value {
    json!({
        "mode": "absolute",
        "steps": [
            { "value": null, "color": "green" },
            { "value": yellow, "color": "yellow" },
            { "value": red, "color": "red" }
        ]
    })
}

#[allow(clippy::too_many_arguments)]
fn stat_panel(
    id: u32,
    title: &str,
    panel_type: &str,
    value: Option<f64>,
    unit: &str,
    thresholds: (f64, f64),
    x: u32,
    datasource_uid: &str,
) -> Value {
    let csv = match value {
        Some(v) => format!("value\n{:.2}\n", v),
        None => "value\n".to_string(),
    };
    json!({
        "id": id,
        "title": title,
        "type": panel_type,
        "gridPos": { "h": 6, "w": 6, "x": x, "y": 6 },
        "datasource": datasource(datasource_uid),
        "targets": [{
            "refId": "A",
            "datasource": datasource(datasource_uid),
            "scenarioId": "csv_content",
            "csvContent": csv
        }],
        "fieldConfig": {
            "defaults": {
                "unit": unit,
                "noValue": "not observed",
                "thresholds": threshold_steps(thresholds.0, thresholds.1)
            },
            "overrides": []
        },
        "options": {
            "colorMode": "value",
            "graphMode": "none",
            "reduceOptions": { "calcs": ["lastNotNull"], "fields": "", "values": false }
        }
    })
}

fn timeseries_panel(
    id: u32,
    title: &str,
    csv: String,
    unit: &str,
    y: u32,
    datasource_uid: &str,
) -> Value {
    json!({
        "id": id,
        "title": title,
        "type": "timeseries",
        "gridPos": { "h": 8, "w": 24, "x": 0, "y": y },
        "datasource": datasource(datasource_uid),
        "targets": [{
            "refId": "A",
            "datasource": datasource(datasource_uid),
            "scenarioId": "csv_content",
            "csvContent": csv
        }],
        "fieldConfig": {
            "defaults": { "unit": unit, "custom": { "lineWidth": 2, "fillOpacity": 10 } },
            "overrides": []
        }
    })
}

fn summary_markdown(request: &DashboardRequest<'_>) -> String {
    let recommendations: Vec<String> = request
        .analysis
        .recommendations
        .iter()
        .map(|r| format!("- {}", r))
        .collect();
    format!(
        "### {scenario} ({intensity}, {duration}s)\n\n**Severity:** {severity}\n\n{summary}\n\n**Recommendations**\n\n{recs}",
        scenario = request.config.scenario.display_name(),
        intensity = request.config.intensity,
        duration = request.config.duration_seconds,
        severity = request.analysis.severity.as_str(),
        summary = request.analysis.summary,
        recs = recommendations.join("\n"),
    )
}

/// Full `POST /api/dashboards/db` body for an experiment
pub fn build_dashboard(request: &DashboardRequest<'_>, datasource_uid: &str) -> Value {
    let id = request.experiment_id;
    let metrics = request.metrics;
    let last_offset = request.timeline.last().map_or(0, |s| s.time_offset);
    let window_end = request.started_at + chrono::Duration::seconds(last_offset as i64 + 5);

    let panels = vec![
        json!({
            "id": 1,
            "title": "Analysis",
            "type": "text",
            "gridPos": { "h": 6, "w": 24, "x": 0, "y": 0 },
            "options": { "mode": "markdown", "content": summary_markdown(request) }
        }),
        stat_panel(2, "CPU Peak", "gauge", Some(metrics.cpu_peak), "percent", (60.0, 80.0), 0, datasource_uid),
        stat_panel(3, "Memory Peak", "gauge", Some(metrics.memory_peak), "percent", (60.0, 85.0), 6, datasource_uid),
        stat_panel(4, "Total Errors", "stat", Some(metrics.total_errors as f64), "short", (5.0, 10.0), 12, datasource_uid),
        stat_panel(5, "Recovery Time", "stat", metrics.recovery_time_seconds, "s", (10.0, 30.0), 18, datasource_uid),
        timeseries_panel(
            6,
            "CPU Usage",
            timeline_csv(request.timeline, request.started_at, TimelineField::Cpu),
            "percent",
            12,
            datasource_uid,
        ),
        timeseries_panel(
            7,
            "Memory Usage",
            timeline_csv(request.timeline, request.started_at, TimelineField::Memory),
            "percent",
            20,
            datasource_uid,
        ),
        timeseries_panel(
            8,
            "Cumulative Errors",
            timeline_csv(request.timeline, request.started_at, TimelineField::Errors),
            "short",
            28,
            datasource_uid,
        ),
    ];

    json!({
        "dashboard": {
            "uid": format!("chaoslab-{}", id),
            "title": format!("ChaosLab - {} - {}", request.config.scenario.display_name(), id),
            "tags": ["chaoslab", "chaos-engineering", request.config.scenario.as_str()],
            "timezone": "browser",
            "schemaVersion": 39,
            "time": {
                "from": request.started_at.to_rfc3339(),
                "to": window_end.to_rfc3339()
            },
            "panels": panels
        },
        "overwrite": true
    })
}

#[derive(Debug, Deserialize)]
struct CreateDashboardResponse {
    url: String,
}

pub struct GrafanaDashboardClient {
    config: DashboardConfig,
    api_token: Option<SecretString>,
    http_client: Client,
    logger: Logger,
}

impl GrafanaDashboardClient {
    pub fn new(config: DashboardConfig, api_token: Option<SecretString>, logger: Logger) -> Self {
        Self {
            config,
            api_token,
            http_client: Client::new(),
            logger,
        }
    }

    async fn create_dashboard(
        &self,
        api_token: &SecretString,
        request: &DashboardRequest<'_>,
    ) -> ChaosLabResult<String> {
        let url = Url::parse(&format!("{}/api/dashboards/db", self.config.base()))?;
        let body = build_dashboard(request, &self.config.datasource_uid);

        let response = self
            .http_client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_token.expose_secret()))
            .json(&body)
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChaosLabError::external_service_error(
                SERVICE_NAME,
                format!("Grafana API error {}: {}", status, error_text),
            ));
        }

        let created: CreateDashboardResponse = response.json().await?;
        Ok(format!("{}{}", self.config.base(), created.url))
    }
}

#[async_trait]
impl DashboardService for GrafanaDashboardClient {
    async fn publish(&self, request: &DashboardRequest<'_>) -> String {
        let logger = self.logger.for_experiment(request.experiment_id, None);
        let placeholder = placeholder_url(&self.config.grafana_url, request.experiment_id);

        let Some(api_token) = self.api_token.as_ref() else {
            logger.info("No Grafana token configured, returning placeholder dashboard URL");
            return placeholder;
        };

        match self.create_dashboard(api_token, request).await {
            Ok(url) => {
                logger.info_with_meta("Dashboard created", Some(&json!({ "url": url })));
                url
            }
            Err(e) => {
                logger.warn_with_meta(
                    "Dashboard creation failed, returning placeholder URL",
                    Some(&json!({ "error": e.message })),
                );
                placeholder
            }
        }
    }

    fn is_configured(&self) -> bool {
        self.api_token.is_some()
    }
}
