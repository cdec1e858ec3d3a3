// src/services/core/experiments/mod.rs

//! Experiment lifecycle: the per-experiment state machine and the service
//! that starts experiments and answers status and result queries.

pub mod experiment_service;
pub mod experiment_state;

pub use experiment_service::{ExperimentService, ExperimentServiceConfig};
pub use experiment_state::ExperimentStateMachine;
