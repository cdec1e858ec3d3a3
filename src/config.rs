// src/config.rs

//! Process-wide configuration.
//!
//! Read once at startup with [`AppConfig::from_env`] and handed to the
//! service container, which passes the relevant pieces into each adapter's
//! constructor.

use std::path::PathBuf;

use secrecy::SecretString;
use url::Url;

use crate::utils::{validate_range, ChaosLabError, ChaosLabResult, LogLevel};

pub const DEFAULT_GROQ_MODEL: &str = "mixtral-8x7b-32768";
pub const DEFAULT_GROQ_API_URL: &str = "https://api.groq.com/openai";
pub const DEFAULT_GRAFANA_URL: &str = "http://localhost:3000";
pub const DEFAULT_RESULTS_DIR: &str = "./results";

#[derive(Debug)]
pub struct SandboxSettings {
    /// Remote provider endpoint; the local process provider is used when absent
    pub api_url: Option<Url>,
    pub api_key: Option<SecretString>,
}

#[derive(Debug)]
pub struct AnalysisSettings {
    /// Absent key means every analysis uses the local fallback
    pub api_key: Option<SecretString>,
    pub model: String,
    pub api_url: Url,
}

#[derive(Debug)]
pub struct DashboardSettings {
    pub grafana_url: Url,
    pub api_token: Option<SecretString>,
}

#[derive(Debug)]
pub struct AppConfig {
    pub sandbox: SandboxSettings,
    pub analysis: AnalysisSettings,
    pub dashboard: DashboardSettings,
    pub results_dir: PathBuf,
    pub sample_interval_seconds: u64,
    pub max_parallel_instances: usize,
    pub retain_instance_timelines: bool,
    pub log_level: LogLevel,
}

impl AppConfig {
    /// Reads configuration from process environment variables
    pub fn from_env() -> ChaosLabResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> ChaosLabResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let secret = |key: &str| non_empty(key).map(SecretString::new);

        let sandbox = SandboxSettings {
            api_url: non_empty("SANDBOX_API_URL")
                .map(|raw| Url::parse(&raw))
                .transpose()?,
            api_key: secret("SANDBOX_API_KEY"),
        };

        let analysis = AnalysisSettings {
            api_key: secret("GROQ_API_KEY"),
            model: non_empty("GROQ_MODEL").unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string()),
            api_url: Url::parse(
                &non_empty("GROQ_API_URL").unwrap_or_else(|| DEFAULT_GROQ_API_URL.to_string()),
            )?,
        };

        let dashboard = DashboardSettings {
            grafana_url: Url::parse(
                &non_empty("GRAFANA_URL").unwrap_or_else(|| DEFAULT_GRAFANA_URL.to_string()),
            )?,
            api_token: secret("GRAFANA_API_TOKEN"),
        };

        let config = Self {
            sandbox,
            analysis,
            dashboard,
            results_dir: PathBuf::from(
                non_empty("RESULTS_DIR").unwrap_or_else(|| DEFAULT_RESULTS_DIR.to_string()),
            ),
            sample_interval_seconds: parse_or("SAMPLE_INTERVAL_SECONDS", non_empty, 5)?,
            max_parallel_instances: parse_or("MAX_PARALLEL_INSTANCES", non_empty, 5)?,
            retain_instance_timelines: parse_or("RETAIN_INSTANCE_TIMELINES", non_empty, false)?,
            log_level: LogLevel::from_string(
                &non_empty("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            ),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChaosLabResult<()> {
        validate_range(self.sample_interval_seconds, 1, 60, "SAMPLE_INTERVAL_SECONDS")
            .map_err(ChaosLabError::config_error)?;
        validate_range(self.max_parallel_instances, 1, 5, "MAX_PARALLEL_INSTANCES")
            .map_err(ChaosLabError::config_error)?;
        if self.sandbox.api_url.is_some() && self.sandbox.api_key.is_none() {
            return Err(ChaosLabError::config_error(
                "SANDBOX_API_KEY is required when SANDBOX_API_URL is set",
            ));
        }
        Ok(())
    }
}

fn parse_or<T, F>(key: &str, lookup: F, default: T) -> ChaosLabResult<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ChaosLabError::config_error(format!("Invalid value for {}: {}", key, raw))),
        None => Ok(default),
    }
}
