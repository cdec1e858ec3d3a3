// src/services/core/infrastructure/service_container.rs

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::grafana_dashboard::{DashboardConfig, DashboardService, GrafanaDashboardClient};
use super::result_archive::{FileResultArchive, ResultArchive};
use crate::config::AppConfig;
use crate::services::core::ai::{AnalysisConfig, AnalysisService, GroqAnalyzer};
use crate::services::core::sandbox::{
    HttpSandboxProvider, LocalProcessSandboxProvider, SandboxProvider,
};
use crate::utils::{ChaosLabResult, Logger};

/// Configuration snapshot of the collaborators, for health endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealthStatus {
    pub sandbox_provider: String,
    pub remote_analysis_configured: bool,
    pub dashboard_configured: bool,
    pub experiments_tracked: usize,
    pub warnings: Vec<String>,
}

/// Collaborators shared by every experiment
#[derive(Clone)]
pub struct ServiceContainer {
    pub sandbox_provider: Arc<dyn SandboxProvider>,
    pub analysis: Arc<dyn AnalysisService>,
    pub dashboard: Arc<dyn DashboardService>,
    pub archive: Arc<dyn ResultArchive>,
}

fn rewrap(secret: &Option<SecretString>) -> Option<SecretString> {
    secret
        .as_ref()
        .map(|s| SecretString::new(s.expose_secret().to_string()))
}

impl ServiceContainer {
    pub fn new(
        sandbox_provider: Arc<dyn SandboxProvider>,
        analysis: Arc<dyn AnalysisService>,
        dashboard: Arc<dyn DashboardService>,
        archive: Arc<dyn ResultArchive>,
    ) -> Self {
        Self {
            sandbox_provider,
            analysis,
            dashboard,
            archive,
        }
    }

    /// Builds the production adapters from process configuration
    pub fn from_config(config: &AppConfig, logger: &Logger) -> ChaosLabResult<Self> {
        let sandbox_provider: Arc<dyn SandboxProvider> =
            match (&config.sandbox.api_url, &config.sandbox.api_key) {
                (Some(url), Some(key)) => Arc::new(HttpSandboxProvider::new(
                    url.clone(),
                    SecretString::new(key.expose_secret().to_string()),
                )),
                _ => Arc::new(LocalProcessSandboxProvider::in_temp_dir()),
            };

        let analysis_config = AnalysisConfig {
            model: config.analysis.model.clone(),
            api_url: config.analysis.api_url.to_string(),
            ..AnalysisConfig::default()
        };
        analysis_config.validate()?;

        let dashboard_config = DashboardConfig {
            grafana_url: config.dashboard.grafana_url.to_string(),
            ..DashboardConfig::default()
        };
        dashboard_config.validate()?;

        let container = Self::new(
            sandbox_provider,
            Arc::new(GroqAnalyzer::new(
                analysis_config,
                rewrap(&config.analysis.api_key),
                logger.clone(),
            )),
            Arc::new(GrafanaDashboardClient::new(
                dashboard_config,
                rewrap(&config.dashboard.api_token),
                logger.clone(),
            )),
            Arc::new(FileResultArchive::new(config.results_dir.clone())),
        );

        let health = serde_json::to_value(container.health_check()).unwrap_or_default();
        logger.info_with_meta("Service container initialized", Some(&health));
        Ok(container)
    }

    pub fn health_check(&self) -> ServiceHealthStatus {
        let mut status = ServiceHealthStatus {
            sandbox_provider: self.sandbox_provider.name().to_string(),
            remote_analysis_configured: self.analysis.is_remote_configured(),
            dashboard_configured: self.dashboard.is_configured(),
            ..ServiceHealthStatus::default()
        };

        if !status.remote_analysis_configured {
            status
                .warnings
                .push("Analysis API key not configured - using fallback analysis".to_string());
        }
        if !status.dashboard_configured {
            status
                .warnings
                .push("Grafana token not configured - using placeholder dashboards".to_string());
        }
        status
    }
}
