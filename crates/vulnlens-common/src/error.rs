use std::path::PathBuf;

use thiserror::Error;

use crate::Language;

#[derive(Debug, Error)]
pub enum VulnLensError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("No trained classifier for {language} (expected at {})", path.display())]
    ArtifactMissing { language: Language, path: PathBuf },

    #[error("Classifier artifact for {language} is unusable: {reason}")]
    ArtifactCorrupt { language: Language, reason: String },

    #[error("Classifier for {language} was trained on {trained_with} embeddings, not {embedder}")]
    EmbeddingModelMismatch {
        language: Language,
        trained_with: String,
        embedder: String,
    },

    #[error("Invalid dataset: {0}")]
    DatasetInvalid(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Embedding has {actual} dimensions, classifier expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Background task failed: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VulnLensError>;
