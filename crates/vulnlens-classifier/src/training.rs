//! Offline training: labeled snippets in, persisted classifier artifact out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};

use vulnlens_common::{Language, Result, TrainingExample, VulnLensError};
use vulnlens_embed::EmbeddingProvider;
use vulnlens_rules::ProfileSet;

use crate::artifact::ClassifierArtifact;
use crate::forest::{ForestParams, RandomForest};
use crate::store::worker_failure;

/// Summary of one training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub language: Language,
    pub n_examples: usize,
    pub n_unsafe: usize,
    pub n_safe: usize,
    pub dimension: usize,
    pub n_trees: usize,
    pub embedding_model: String,
    /// Out-of-bag accuracy. Informational; the forest is always fit on every example.
    pub oob_accuracy: Option<f64>,
    pub elapsed_ms: u64,
    pub artifact_path: PathBuf,
}

/// Read a dataset file: a JSON array of `{"code": ..., "label": 0|1}`.
pub fn load_dataset(path: &Path) -> Result<Vec<TrainingExample>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| VulnLensError::DatasetInvalid(format!("{}: {e}", path.display())))
}

/// Reject empty datasets and labels outside {0, 1} before any work is done.
fn validate(examples: &[TrainingExample]) -> Result<(usize, usize)> {
    if examples.is_empty() {
        return Err(VulnLensError::DatasetInvalid("dataset is empty".to_string()));
    }
    let mut n_unsafe = 0;
    for (i, example) in examples.iter().enumerate() {
        match example.label {
            0 => {}
            1 => n_unsafe += 1,
            other => {
                return Err(VulnLensError::DatasetInvalid(format!(
                    "record {i} has label {other}, expected 0 or 1"
                )))
            }
        }
    }
    Ok((n_unsafe, examples.len() - n_unsafe))
}

/// Fits and persists one classifier per call.
pub struct Trainer {
    profiles: Arc<ProfileSet>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: ForestParams,
    artifact_dir: PathBuf,
}

impl Trainer {
    pub fn new(
        profiles: Arc<ProfileSet>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: ForestParams,
        artifact_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            profiles,
            embedder,
            params,
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Normalize, embed, fit on the full dataset, then persist the artifact.
    ///
    /// Nothing is written unless every step succeeds.
    #[instrument(skip(self, examples), fields(examples = examples.len()))]
    pub async fn train(
        &self,
        language: Language,
        examples: &[TrainingExample],
    ) -> Result<(ClassifierArtifact, TrainingReport)> {
        let start = Instant::now();
        let (n_unsafe, n_safe) = validate(examples)?;
        self.params.validate()?;
        if n_unsafe == 0 || n_safe == 0 {
            warn!("Training {} on a single class ({} unsafe, {} safe)", language, n_unsafe, n_safe);
        }

        let profile = self.profiles.get(language)?;
        let normalized: Vec<String> = examples.iter().map(|e| profile.normalize(&e.code)).collect();

        info!("Embedding {} {} examples with {}", normalized.len(), language, self.embedder.model_name());
        let vectors = self.embedder.embed_batch(&normalized).await?;
        if vectors.len() != examples.len() {
            return Err(VulnLensError::EmbeddingFailure(format!(
                "{} examples but {} embeddings",
                examples.len(),
                vectors.len()
            )));
        }
        if vectors.iter().any(|v| v.as_slice().iter().any(|x| !x.is_finite())) {
            return Err(VulnLensError::EmbeddingFailure("embedding contains non-finite values".to_string()));
        }

        let x: Vec<Vec<f32>> = vectors.into_iter().map(|v| v.into_inner()).collect();
        let y: Vec<u8> = examples.iter().map(|e| e.label as u8).collect();
        let params = self.params.clone();
        let (forest, oob_accuracy) = tokio::task::spawn_blocking(move || RandomForest::fit(&x, &y, &params))
            .await
            .map_err(|e| worker_failure(format_args!("fitting {language} forest"), e))??;

        let artifact = ClassifierArtifact::new(language, self.embedder.model_name(), examples.len(), forest)?;
        let artifact_path = artifact.save(&self.artifact_dir)?;

        let report = TrainingReport {
            language,
            n_examples: examples.len(),
            n_unsafe,
            n_safe,
            dimension: artifact.dimension(),
            n_trees: artifact.forest().n_trees(),
            embedding_model: artifact.embedding_model().to_string(),
            oob_accuracy,
            elapsed_ms: start.elapsed().as_millis() as u64,
            artifact_path,
        };
        match report.oob_accuracy {
            Some(acc) => info!("Trained {} classifier in {}ms (OOB accuracy {:.3})", language, report.elapsed_ms, acc),
            None => info!("Trained {} classifier in {}ms", language, report.elapsed_ms),
        }
        Ok((artifact, report))
    }

    /// [`Trainer::train`] on a dataset file.
    pub async fn train_from_file(
        &self,
        language: Language,
        dataset: &Path,
    ) -> Result<(ClassifierArtifact, TrainingReport)> {
        let examples = load_dataset(dataset)?;
        self.train(language, &examples).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vulnlens_common::Prediction;

    #[test]
    fn test_validate_counts_labels() {
        let examples = vec![
            TrainingExample::new("a", Prediction::Unsafe),
            TrainingExample::new("b", Prediction::Safe),
            TrainingExample::new("c", Prediction::Unsafe),
        ];
        assert_eq!(validate(&examples).unwrap(), (2, 1));
    }

    #[test]
    fn test_validate_rejects_empty_and_bad_labels() {
        assert!(matches!(validate(&[]), Err(VulnLensError::DatasetInvalid(_))));
        let bad = vec![TrainingExample { code: "x".into(), label: 2 }];
        assert!(matches!(validate(&bad), Err(VulnLensError::DatasetInvalid(_))));
        let negative = vec![TrainingExample { code: "x".into(), label: -1 }];
        assert!(matches!(validate(&negative), Err(VulnLensError::DatasetInvalid(_))));
    }

    #[test]
    fn test_load_dataset_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("python.json");
        std::fs::write(&path, r#"[{"code": "x = 1"}]"#).unwrap();
        assert!(matches!(load_dataset(&path), Err(VulnLensError::DatasetInvalid(_))));

        std::fs::write(&path, r#"[{"code": "x = 1", "label": 0}]"#).unwrap();
        assert_eq!(load_dataset(&path).unwrap().len(), 1);
    }
}
