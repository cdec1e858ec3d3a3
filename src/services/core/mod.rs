// src/services/core/mod.rs

pub mod ai;
pub mod chaos;
pub mod experiments;
pub mod infrastructure;
pub mod sandbox;

// Re-export all services for convenience
pub use ai::*;
pub use chaos::*;
pub use experiments::*;
pub use infrastructure::*;
pub use sandbox::*;
