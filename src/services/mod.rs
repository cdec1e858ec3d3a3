// src/services/mod.rs

// Core services organized by domain
pub mod core;

// Re-export commonly used services
pub use core::experiments::{ExperimentService, ExperimentServiceConfig};
pub use core::infrastructure::ServiceContainer;
