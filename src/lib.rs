// src/lib.rs

//! ChaosLab: runs short chaos engineering experiments against a sample
//! workload in ephemeral sandboxes, records a resource timeline, and
//! produces an analysis and a dashboard for each run.

// Module declarations
pub mod config;
pub mod services;
pub mod types;
pub mod utils;

use anyhow::Context;

pub use config::AppConfig;
pub use services::core::experiments::{
    ExperimentService, ExperimentServiceConfig, ExperimentStateMachine,
};
pub use services::core::infrastructure::{ServiceContainer, ServiceHealthStatus};
pub use types::{
    ChaosScenario, Experiment, ExperimentConfig, ExperimentState, Intensity, StatusResponse,
};
pub use utils::{ChaosLabError, ChaosLabResult};

/// Reads configuration from the environment, installs the global logger and
/// wires the production adapters into an [`ExperimentService`].
pub fn bootstrap_from_env() -> anyhow::Result<ExperimentService> {
    let config = AppConfig::from_env().context("invalid ChaosLab configuration")?;
    utils::init_logger(config.log_level.clone());
    let logger = utils::logger().clone();

    let container = ServiceContainer::from_config(&config, &logger)
        .context("failed to initialize service container")?;
    let sandbox_provider = container.sandbox_provider.name();
    let service = ExperimentService::new(
        container,
        ExperimentServiceConfig::from_app_config(&config),
        logger,
    )
    .context("invalid experiment service configuration")?;

    crate::log_info!(
        "ChaosLab experiment service ready",
        serde_json::json!({ "sandbox_provider": sandbox_provider })
    );
    Ok(service)
}
