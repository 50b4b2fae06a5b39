//! Persisted, versioned classifier artifacts.
//!
//! One JSON file per language at `<dir>/<language>_model.json`. The forest
//! payload is fingerprinted with SHA-256 when the artifact is created and the
//! fingerprint is re-checked on every load.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use vulnlens_common::{EmbeddingVector, Language, Prediction, Result, VulnLensError};

use crate::forest::RandomForest;

/// Bumped whenever the on-disk layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// Location of the artifact for `language` under `dir`.
pub fn artifact_path(dir: &Path, language: Language) -> PathBuf {
    dir.join(format!("{}_model.json", language.as_str()))
}

fn digest_forest(forest: &RandomForest) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(forest)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// A trained classifier bound to one language. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    format_version: u32,
    language: Language,
    embedding_model: String,
    dimension: usize,
    created_at: DateTime<Utc>,
    n_examples: usize,
    digest: String,
    forest: RandomForest,
}

impl ClassifierArtifact {
    pub fn new(
        language: Language,
        embedding_model: impl Into<String>,
        n_examples: usize,
        forest: RandomForest,
    ) -> Result<Self> {
        Ok(Self {
            format_version: FORMAT_VERSION,
            language,
            embedding_model: embedding_model.into(),
            dimension: forest.n_features(),
            created_at: Utc::now(),
            n_examples,
            digest: digest_forest(&forest)?,
            forest,
        })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Embedding model the forest was trained on.
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Refuse vectors from an embedder other than the one used for training.
    pub fn check_embedder(&self, model_name: &str) -> Result<()> {
        if model_name != self.embedding_model {
            return Err(VulnLensError::EmbeddingModelMismatch {
                language: self.language,
                trained_with: self.embedding_model.clone(),
                embedder: model_name.to_string(),
            });
        }
        Ok(())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn n_examples(&self) -> usize {
        self.n_examples
    }

    /// Hex SHA-256 of the serialized forest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }

    /// Fraction of trees voting unsafe.
    pub fn predict_proba(&self, vector: &EmbeddingVector) -> Result<f64> {
        if vector.dim() != self.dimension {
            return Err(VulnLensError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.dim(),
            });
        }
        Ok(self.forest.predict_proba(vector.as_slice()))
    }

    /// Unsafe when more than half of the votes say so; a tie is Safe.
    pub fn predict(&self, vector: &EmbeddingVector) -> Result<Prediction> {
        Ok(Self::decide(self.predict_proba(vector)?))
    }

    pub fn decide(unsafe_probability: f64) -> Prediction {
        if unsafe_probability > 0.5 {
            Prediction::Unsafe
        } else {
            Prediction::Safe
        }
    }

    /// Write to `<dir>/<language>_model.json`, replacing any previous artifact.
    ///
    /// The file is written next to its destination and renamed into place,
    /// so readers never observe a partial artifact.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = artifact_path(dir, self.language);
        let tmp = dir.join(format!(".{}_model.json.tmp", self.language.as_str()));

        let json = serde_json::to_vec_pretty(self)?;
        if let Err(e) = std::fs::write(&tmp, &json).and_then(|_| std::fs::rename(&tmp, &path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        info!(
            "Saved {} classifier ({} trees, {} bytes) to {}",
            self.language,
            self.forest.n_trees(),
            json.len(),
            path.display()
        );
        Ok(path)
    }

    /// Load and verify the artifact for `language` from `dir`.
    pub fn load(dir: &Path, language: Language) -> Result<Self> {
        let path = artifact_path(dir, language);
        if !path.is_file() {
            return Err(VulnLensError::ArtifactMissing { language, path });
        }

        let bytes = std::fs::read(&path)?;
        let corrupt = |reason: String| VulnLensError::ArtifactCorrupt { language, reason };

        let artifact: Self = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(format!("{}: {e}", path.display())))?;

        if artifact.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "format version {} (expected {FORMAT_VERSION})",
                artifact.format_version
            )));
        }
        if artifact.language != language {
            return Err(corrupt(format!("artifact is for {}", artifact.language)));
        }
        artifact.forest.validate().map_err(corrupt)?;
        if artifact.dimension != artifact.forest.n_features() {
            return Err(corrupt(format!(
                "declared dimension {} but forest uses {}",
                artifact.dimension,
                artifact.forest.n_features()
            )));
        }
        let digest = digest_forest(&artifact.forest)?;
        if digest != artifact.digest {
            return Err(corrupt(format!("digest mismatch: file says {}, payload is {digest}", artifact.digest)));
        }

        debug!(
            "Loaded {language} classifier: {} trees, dim {}, trained {}",
            artifact.forest.n_trees(),
            artifact.dimension,
            artifact.created_at
        );
        Ok(artifact)
    }
}
