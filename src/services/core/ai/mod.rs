// src/services/core/ai/mod.rs

//! Experiment analysis: a remote language model when configured, with a
//! deterministic rule-based fallback.

pub mod analysis_fallback;
pub mod groq_analyzer;

pub use analysis_fallback::{classify_severity, fallback_analysis, recommendations_for};
pub use groq_analyzer::{AnalysisConfig, AnalysisRequest, AnalysisService, GroqAnalyzer};
