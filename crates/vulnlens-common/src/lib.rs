//! vulnlens-common — Shared types, errors, and the language set used across all VulnLens crates.

pub mod error;
pub mod language;
pub mod types;

// Re-export commonly used types
pub use error::{Result, VulnLensError};
pub use language::Language;
pub use types::{AnalysisResult, EmbeddingVector, Match, Prediction, TrainingExample};
