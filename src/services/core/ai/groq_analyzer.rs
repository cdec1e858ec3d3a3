// src/services/core/ai/groq_analyzer.rs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use super::analysis_fallback::fallback_analysis;
use crate::config::{DEFAULT_GROQ_API_URL, DEFAULT_GROQ_MODEL};
use crate::types::{
    AnalysisResult, AnalysisSource, ExperimentConfig, RunMetrics, Severity, Timeline,
};
use crate::utils::{truncate_utf8, ChaosLabError, ChaosLabResult, Logger};

const SERVICE_NAME: &str = "groq";

const SYSTEM_PROMPT: &str = r#"You are a chaos engineering expert analyzing application resilience tests.
Analyze the experiment metrics, timeline and logs, then return ONLY valid JSON with this exact structure:
{
  "summary": "brief narrative of what happened and whether the application recovered",
  "severity": "low" | "medium" | "high",
  "recommendations": ["recommendation 1", "recommendation 2", ...]
}"#;

/// Everything the analysis needs about a finished run
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub experiment_id: &'a str,
    pub config: &'a ExperimentConfig,
    pub timeline: &'a Timeline,
    pub metrics: &'a RunMetrics,
    pub logs: &'a str,
    pub num_instances: u32,
}

/// Produces an analysis for every request; degraded results are marked, never raised
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> AnalysisResult;

    fn is_remote_configured(&self) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub model: String,
    /// Base URL; `/v1/chat/completions` is appended
    pub api_url: String,
    pub timeout_seconds: u64,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Log bytes included in the prompt
    pub max_log_bytes: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_GROQ_MODEL.to_string(),
            api_url: DEFAULT_GROQ_API_URL.to_string(),
            timeout_seconds: 30,
            temperature: 0.3,
            max_tokens: 1000,
            max_log_bytes: 2000,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> ChaosLabResult<()> {
        if self.model.trim().is_empty() {
            return Err(ChaosLabError::config_error("Analysis model must not be empty"));
        }
        Url::parse(&self.api_url)?;
        if self.timeout_seconds == 0 {
            return Err(ChaosLabError::config_error(
                "Analysis timeout_seconds must be greater than 0",
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ChaosLabError::config_error(
                "Analysis temperature must be between 0.0 and 2.0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ModelVerdict {
    summary: String,
    severity: String,
    recommendations: Vec<String>,
}

/// Analysis through Groq's OpenAI-compatible chat completions API
pub struct GroqAnalyzer {
    config: AnalysisConfig,
    api_key: Option<SecretString>,
    http_client: Client,
    logger: Logger,
}

impl GroqAnalyzer {
    pub fn new(config: AnalysisConfig, api_key: Option<SecretString>, logger: Logger) -> Self {
        Self {
            config,
            api_key,
            http_client: Client::new(),
            logger,
        }
    }

    fn completions_url(&self) -> ChaosLabResult<Url> {
        let base = self.config.api_url.trim_end_matches('/');
        Ok(Url::parse(&format!("{}/v1/chat/completions", base))?)
    }

    pub fn build_prompt(&self, request: &AnalysisRequest<'_>) -> String {
        let timeline_rows: Vec<String> = request
            .timeline
            .iter()
            .map(|s| {
                format!(
                    "{:>4}s  cpu {:>5.1}%  mem {:>5.1}%  errors {}",
                    s.time_offset, s.cpu_percent, s.memory_percent, s.cumulative_error_count
                )
            })
            .collect();
        let recovery = request
            .metrics
            .recovery_time_seconds
            .map_or_else(|| "not observed".to_string(), |s| format!("{:.0}s", s));

        format!(
            "Chaos Experiment Analysis Request\n\n\
             Scenario: {scenario}\n\
             Intensity: {intensity}\n\
             Duration: {duration} seconds\n\
             Instances averaged: {instances}\n\n\
             Summary Metrics:\n\
             - CPU peak: {cpu:.2}%\n\
             - Memory peak: {memory:.2}%\n\
             - Total errors: {errors}\n\
             - Recovery time: {recovery}\n\n\
             Timeline:\n{timeline}\n\n\
             Application Logs:\n{logs}\n\n\
             Explain what happened, how the application responded, whether it recovered \
             gracefully, and what would improve its resilience.",
            scenario = request.config.scenario.display_name(),
            intensity = request.config.intensity,
            duration = request.config.duration_seconds,
            instances = request.num_instances,
            cpu = request.metrics.cpu_peak,
            memory = request.metrics.memory_peak,
            errors = request.metrics.total_errors,
            recovery = recovery,
            timeline = timeline_rows.join("\n"),
            logs = truncate_utf8(request.logs, self.config.max_log_bytes),
        )
    }

    /// Validates the model's JSON content; the metrics always come from `metrics`
    pub fn parse_model_content(content: &str, metrics: &RunMetrics) -> ChaosLabResult<AnalysisResult> {
        let verdict: ModelVerdict = serde_json::from_str(content.trim()).map_err(|e| {
            ChaosLabError::external_service_error(
                SERVICE_NAME,
                format!("Malformed analysis JSON: {}", e),
            )
        })?;

        let summary = verdict.summary.trim().to_string();
        if summary.is_empty() {
            return Err(ChaosLabError::external_service_error(
                SERVICE_NAME,
                "Analysis summary is empty",
            ));
        }
        let severity: Severity = verdict.severity.parse().map_err(|_| {
            ChaosLabError::external_service_error(
                SERVICE_NAME,
                format!("Unknown severity '{}'", verdict.severity),
            )
        })?;
        let recommendations: Vec<String> = verdict
            .recommendations
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if recommendations.is_empty() {
            return Err(ChaosLabError::external_service_error(
                SERVICE_NAME,
                "Analysis contains no recommendations",
            ));
        }

        Ok(AnalysisResult {
            summary,
            metrics: metrics.clone(),
            severity,
            recommendations,
            source: AnalysisSource::Remote,
        })
    }

    async fn request_remote(
        &self,
        api_key: &SecretString,
        request: &AnalysisRequest<'_>,
    ) -> ChaosLabResult<AnalysisResult> {
        let payload = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": self.build_prompt(request) }
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "response_format": { "type": "json_object" }
        });

        let response = self
            .http_client
            .post(self.completions_url()?)
            .header("Authorization", format!("Bearer {}", api_key.expose_secret()))
            .header("Content-Type", "application/json")
            .json(&payload)
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChaosLabError::external_service_error(
                SERVICE_NAME,
                format!("Groq API error {}: {}", status, error_text),
            ));
        }

        let body: Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ChaosLabError::external_service_error(SERVICE_NAME, "Response has no message content")
            })?;

        Self::parse_model_content(content, request.metrics)
    }
}

#[async_trait]
impl AnalysisService for GroqAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> AnalysisResult {
        let logger = self.logger.for_experiment(request.experiment_id, None);

        let Some(api_key) = self.api_key.as_ref() else {
            logger.info("No analysis API key configured, using fallback analysis");
            return fallback_analysis(request.config.scenario, request.metrics);
        };

        match self.request_remote(api_key, request).await {
            Ok(result) => {
                logger.info_with_meta(
                    "Analysis completed",
                    Some(&json!({ "severity": result.severity.as_str(), "model": self.config.model })),
                );
                result
            }
            Err(e) => {
                logger.warn_with_meta(
                    "Remote analysis failed, using fallback analysis",
                    Some(&json!({ "error": e.message, "kind": e.kind })),
                );
                fallback_analysis(request.config.scenario, request.metrics)
            }
        }
    }

    fn is_remote_configured(&self) -> bool {
        self.api_key.is_some()
    }
}
