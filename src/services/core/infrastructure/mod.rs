// src/services/core/infrastructure/mod.rs

//! External collaborators of the pipeline: dashboards, result storage and
//! the container that wires them together.

pub mod grafana_dashboard;
pub mod result_archive;
pub mod service_container;

pub use grafana_dashboard::{
    build_dashboard, placeholder_url, DashboardConfig, DashboardRequest, DashboardService,
    GrafanaDashboardClient,
};
pub use result_archive::{FileResultArchive, ResultArchive};
pub use service_container::{ServiceContainer, ServiceHealthStatus};
