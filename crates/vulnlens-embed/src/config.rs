//! Configuration for the embedding service.

use serde::{Deserialize, Serialize};

/// Configuration for the CodeBERT embedder.
///
/// Every field has a default so a partial `[embedding]` table deserializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Hugging Face model ID
    pub model_id: String,

    /// Load `config.json`, tokenizer and weights from this directory instead of the Hub
    pub local_dir: Option<String>,

    /// Maximum sequence length in tokens, special tokens included (default: 512)
    pub max_length: usize,

    /// Snippets per forward pass (default: 16)
    pub batch_size: usize,

    /// L2-normalize embeddings (default: false)
    pub normalize: bool,

    /// Use GPU if available (default: false)
    pub use_gpu: bool,

    /// Cache directory for downloaded models
    pub cache_dir: Option<String>,

    /// Maximum cache size for embeddings (number of entries, 0 disables)
    pub cache_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "microsoft/codebert-base".to_string(),
            local_dir: None,
            max_length: 512,
            batch_size: 16,
            normalize: false,
            use_gpu: false,
            cache_dir: None,
            cache_size: 1024,
        }
    }
}

impl EmbeddingConfig {
    /// Create config for CPU-only inference.
    pub fn cpu() -> Self {
        Self {
            use_gpu: false,
            ..Default::default()
        }
    }

    /// Use a custom model.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Load model files from a local directory.
    pub fn with_local_dir(mut self, dir: impl Into<String>) -> Self {
        self.local_dir = Some(dir.into());
        self
    }

    /// Set batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set maximum sequence length.
    pub fn with_max_length(mut self, length: usize) -> Self {
        self.max_length = length;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_table_uses_defaults() {
        let cfg: EmbeddingConfig = serde_json::from_str(r#"{"batch_size": 4}"#).unwrap();
        assert_eq!(cfg.batch_size, 4);
        assert_eq!(cfg.model_id, "microsoft/codebert-base");
        assert_eq!(cfg.max_length, 512);
        assert!(!cfg.use_gpu);
    }

    #[test]
    fn test_builder_methods() {
        let cfg = EmbeddingConfig::cpu()
            .with_model("microsoft/graphcodebert-base")
            .with_local_dir("models/graphcodebert")
            .with_max_length(128)
            .with_batch_size(4);
        assert_eq!(cfg.model_id, "microsoft/graphcodebert-base");
        assert_eq!(cfg.local_dir.as_deref(), Some("models/graphcodebert"));
        assert_eq!(cfg.max_length, 128);
        assert_eq!(cfg.batch_size, 4);
        assert_eq!(cfg.cache_size, 1024);
    }
}
