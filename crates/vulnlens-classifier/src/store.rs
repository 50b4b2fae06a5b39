//! Process-wide cache of loaded classifier artifacts.
//!
//! Each language's artifact is read from disk at most once; afterwards every
//! request shares the same `Arc`. Concurrent first requests for one language
//! wait on a per-language lock instead of loading the file twice.
//!
//! # Example
//!
//! ```rust,no_run
//! use vulnlens_classifier::ArtifactStore;
//! use vulnlens_common::Language;
//!
//! # async fn run() -> vulnlens_common::Result<()> {
//! let store = ArtifactStore::new("models");
//! store.preload(&[Language::Python, Language::Java]).await?;
//!
//! let python = store.get_or_load(Language::Python).await?;
//! println!("{} trees", python.forest().n_trees());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinError;
use tracing::{debug, info};

use vulnlens_common::{Language, Result, VulnLensError};

use crate::artifact::ClassifierArtifact;

pub struct ArtifactStore {
    dir: PathBuf,
    artifacts: RwLock<HashMap<Language, Arc<ClassifierArtifact>>>,
    /// Serializes first loads per language.
    loading: HashMap<Language, Mutex<()>>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("dir", &self.dir)
            .field("artifacts", &"<cached artifacts>")
            .finish()
    }
}

impl ArtifactStore {
    /// A store reading artifacts from `dir`. Nothing is loaded until first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            artifacts: RwLock::new(HashMap::new()),
            loading: Language::ALL.iter().map(|&l| (l, Mutex::new(()))).collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the artifact for `language`, loading it on first use.
    pub async fn get_or_load(&self, language: Language) -> Result<Arc<ClassifierArtifact>> {
        if let Some(artifact) = self.cached(language).await {
            debug!("Artifact cache hit: {}", language);
            return Ok(artifact);
        }

        let gate = self
            .loading
            .get(&language)
            .ok_or_else(|| VulnLensError::UnsupportedLanguage(language.to_string()))?;
        let _guard = gate.lock().await;

        // Another task may have finished loading while we waited.
        if let Some(artifact) = self.cached(language).await {
            return Ok(artifact);
        }

        info!("Loading {} classifier from {}", language, self.dir.display());
        let dir = self.dir.clone();
        let artifact = tokio::task::spawn_blocking(move || ClassifierArtifact::load(&dir, language))
            .await
            .map_err(|e| worker_failure(format_args!("loading {language} classifier"), e))??;
        let artifact = Arc::new(artifact);

        let mut artifacts = self.artifacts.write().await;
        artifacts.insert(language, Arc::clone(&artifact));
        info!("Classifier cached: {} ({} in cache)", language, artifacts.len());
        Ok(artifact)
    }

    /// Install an artifact directly, e.g. one just produced by training.
    pub async fn insert(&self, artifact: Arc<ClassifierArtifact>) {
        let language = artifact.language();
        self.artifacts.write().await.insert(language, artifact);
        debug!("Classifier for {} replaced in cache", language);
    }

    async fn cached(&self, language: Language) -> Option<Arc<ClassifierArtifact>> {
        self.artifacts.read().await.get(&language).cloned()
    }

    pub async fn is_cached(&self, language: Language) -> bool {
        self.artifacts.read().await.contains_key(&language)
    }

    pub async fn cached_count(&self) -> usize {
        self.artifacts.read().await.len()
    }

    /// Drop every cached artifact; the next request reloads from disk.
    pub async fn clear(&self) {
        let mut artifacts = self.artifacts.write().await;
        let count = artifacts.len();
        artifacts.clear();
        info!("Cleared {} classifiers from cache", count);
    }

    /// Load several languages up front.
    pub async fn preload(&self, languages: &[Language]) -> Result<()> {
        info!("Preloading {} classifiers...", languages.len());
        for &language in languages {
            self.get_or_load(language).await?;
        }
        info!("Preload complete. {} classifiers in cache.", self.cached_count().await);
        Ok(())
    }
}

/// A blocking worker that panicked or was cancelled.
pub(crate) fn worker_failure(task: std::fmt::Arguments<'_>, e: JoinError) -> VulnLensError {
    VulnLensError::Worker(format!("{task}: {e}"))
}
