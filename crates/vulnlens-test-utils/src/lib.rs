//! Shared test fixtures: a deterministic offline embedder and synthetic datasets.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use vulnlens_common::{EmbeddingVector, Language, Prediction, TrainingExample};
use vulnlens_embed::{EmbedError, EmbeddingProvider};

/// Bag-of-tokens feature hashing into `dim` buckets.
///
/// Same text, same vector; texts sharing tokens land close together, which is
/// enough for a forest to separate the synthetic datasets below. Counts every
/// call so tests can assert that no embedding work happened.
pub struct HashingEmbedder {
    dim: usize,
    name: String,
    fail: bool,
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            name: "test/hashing-embedder".to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }

    /// An embedder whose every call fails with an inference error.
    pub fn failing(dim: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(dim)
        }
    }

    /// Same vectors, reported under another model name.
    pub fn named(dim: usize, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::new(dim)
        }
    }

    /// Number of `embed_batch` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of texts embedded so far.
    pub fn embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> EmbeddingVector {
        let mut values = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(bytes);
            let bucket = (h % self.dim as u64) as usize;
            values[bucket] += if h >> 63 == 0 { 1.0 } else { -1.0 };
        }
        EmbeddingVector::new(values)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> vulnlens_embed::Result<Vec<EmbeddingVector>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbedError::Inference("embedder configured to fail".to_string()));
        }
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// A snippet that trips the language's pattern table.
pub fn unsafe_snippet(language: Language, i: usize) -> String {
    match language {
        Language::Python => format!("import os\ncmd_{i} = input()\nos.system(cmd_{i})\n"),
        Language::Php => format!("<?php\n$cmd{i} = $_GET['c'];\nshell_exec($cmd{i});\n"),
        Language::JavaScript => format!("var input{i} = location.hash;\ndocument.write(input{i});\neval(input{i});\n"),
        Language::Java => format!(
            "String cmd{i} = request.getParameter(\"c\");\nRuntime.getRuntime().exec(cmd{i});\n"
        ),
    }
}

/// A harmless snippet with no pattern hits.
pub fn safe_snippet(language: Language, i: usize) -> String {
    match language {
        Language::Python => format!("total_{i} = {i} + 1\nprint(total_{i})\n"),
        Language::Php => format!("<?php\n$total{i} = {i} + 1;\necho $total{i};\n"),
        Language::JavaScript => format!("const total{i} = {i} + 1;\nconsole.log(total{i});\n"),
        Language::Java => format!("int total{i} = {i} + 1;\nSystem.out.println(total{i});\n"),
    }
}

/// `per_class` unsafe and `per_class` safe examples, interleaved.
pub fn labeled_dataset(language: Language, per_class: usize) -> Vec<TrainingExample> {
    (0..per_class)
        .flat_map(|i| {
            [
                TrainingExample::new(unsafe_snippet(language, i), Prediction::Unsafe),
                TrainingExample::new(safe_snippet(language, i), Prediction::Safe),
            ]
        })
        .collect()
}

/// Deterministically shuffle a dataset.
pub fn shuffled(mut examples: Vec<TrainingExample>, seed: u64) -> Vec<TrainingExample> {
    let mut rng = StdRng::seed_from_u64(seed);
    examples.shuffle(&mut rng);
    examples
}

/// Write `examples` as `<dir>/<language>.json`, the dataset layout the trainer reads.
pub fn write_dataset(dir: &Path, language: Language, examples: &[TrainingExample]) -> PathBuf {
    let path = dir.join(format!("{}.json", language.as_str()));
    let json = serde_json::to_string_pretty(examples).expect("serialize dataset");
    std::fs::write(&path, json).expect("write dataset");
    path
}

/// A fresh temporary directory, removed on drop.
pub fn temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("create temp dir")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(32);
        let a = embedder.embed("os.system(cmd)").await.unwrap();
        let b = embedder
            .embed_batch(&["print(x)".to_string(), "os.system(cmd)".to_string()])
            .await
            .unwrap();
        assert_eq!(a, b[1]);
        assert_eq!(a.dim(), 32);
        assert_eq!(embedder.calls(), 2);
        assert_eq!(embedder.embedded(), 3);
    }

    #[test]
    fn dataset_is_balanced() {
        let data = labeled_dataset(Language::Java, 5);
        assert_eq!(data.len(), 10);
        assert_eq!(data.iter().filter(|e| e.label == 1).count(), 5);
    }
}
