//! The analysis orchestrator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use vulnlens_classifier::{ArtifactStore, ClassifierArtifact, ForestParams, Trainer, TrainingReport};
use vulnlens_common::{AnalysisResult, Language, Match, Result, TrainingExample, VulnLensError};
use vulnlens_embed::{CodeBertEmbedder, EmbeddingProvider};
use vulnlens_rules::ProfileSet;

use crate::config::Settings;

/// Composes language profiles, the embedder and the classifier store into
/// one `analyze` call. Cheap to share: every component sits behind an `Arc`
/// and is read-only after construction.
#[derive(Clone)]
pub struct Engine {
    profiles: Arc<ProfileSet>,
    embedder: Arc<dyn EmbeddingProvider>,
    artifacts: Arc<ArtifactStore>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("embedder", &self.embedder.model_name())
            .field("artifacts", &self.artifacts)
            .finish()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Build an engine with the CodeBERT embedder described by `settings`.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let embedder = CodeBertEmbedder::new(settings.embedding.clone()).await?;
        if settings.embedding.use_gpu && !embedder.is_gpu() {
            warn!("GPU requested but no CUDA or Metal device is available, running on CPU");
        }
        Self::builder()
            .embedder(Arc::new(embedder))
            .patterns_dir(settings.rules.patterns_dir.clone())
            .artifact_dir(settings.artifacts.dir.clone())
            .build()
    }

    pub fn profiles(&self) -> &Arc<ProfileSet> {
        &self.profiles
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Analyze one snippet given a language identifier such as `"python"`.
    ///
    /// An unknown identifier fails before any normalization, embedding or
    /// artifact load. A classifier trained with a different embedding model
    /// is rejected before the snippet is embedded.
    pub async fn analyze(&self, language: &str, raw_text: &str) -> Result<AnalysisResult> {
        let language: Language = language.parse()?;
        self.analyze_language(language, raw_text).await
    }

    #[instrument(skip(self, raw_text), fields(bytes = raw_text.len()))]
    pub async fn analyze_language(&self, language: Language, raw_text: &str) -> Result<AnalysisResult> {
        let start = Instant::now();
        let profile = self.profiles.get(language)?;
        let artifact = self.artifacts.get_or_load(language).await?;
        artifact.check_embedder(self.embedder.model_name())?;

        let normalized = profile.normalize(raw_text);
        let matches = profile.tag(&normalized);
        let vector = self.embedder.embed(&normalized).await?;
        let unsafe_probability = artifact.predict_proba(&vector)?;
        let prediction = ClassifierArtifact::decide(unsafe_probability);

        debug!(
            "Analyzed {} snippet: {} matches, {:?} (p={:.3}) in {:.2}ms",
            language,
            matches.len(),
            prediction,
            unsafe_probability,
            start.elapsed().as_secs_f32() * 1000.0
        );

        Ok(AnalysisResult {
            language,
            matches,
            prediction,
            unsafe_probability,
        })
    }

    /// Normalization and lexical tagging only; needs no classifier.
    pub fn tag_only(&self, language: &str, raw_text: &str) -> Result<Vec<Match>> {
        let language: Language = language.parse()?;
        Ok(self.profiles.get(language)?.scan(raw_text))
    }

    /// Train a classifier with this engine's profiles and embedder, persist it,
    /// and make it the one subsequent analyses use.
    pub async fn train(
        &self,
        language: Language,
        examples: &[TrainingExample],
        params: ForestParams,
    ) -> Result<TrainingReport> {
        let trainer = Trainer::new(
            Arc::clone(&self.profiles),
            Arc::clone(&self.embedder),
            params,
            self.artifacts.dir(),
        );
        let (artifact, report) = trainer.train(language, examples).await?;
        self.artifacts.insert(Arc::new(artifact)).await;
        Ok(report)
    }
}

#[derive(Default)]
pub struct EngineBuilder {
    profiles: Option<Arc<ProfileSet>>,
    patterns_dir: Option<PathBuf>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    artifacts: Option<Arc<ArtifactStore>>,
    artifact_dir: Option<PathBuf>,
}

impl EngineBuilder {
    pub fn profiles(mut self, profiles: Arc<ProfileSet>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Load profiles from this override directory (ignored when `profiles` is set).
    pub fn patterns_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.patterns_dir = dir;
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn artifact_store(mut self, store: Arc<ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    /// Create a fresh store over this directory (ignored when `artifact_store` is set).
    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<Engine> {
        let embedder = self
            .embedder
            .ok_or_else(|| VulnLensError::Config("engine needs an embedding provider".to_string()))?;
        let profiles = match self.profiles {
            Some(profiles) => profiles,
            None => Arc::new(ProfileSet::load(self.patterns_dir.as_deref())?),
        };
        let artifacts = match self.artifacts {
            Some(store) => store,
            None => {
                let dir = self.artifact_dir.unwrap_or_else(|| PathBuf::from("models"));
                Arc::new(ArtifactStore::new(dir))
            }
        };

        info!(
            "Engine ready: embedder {} ({} dims), classifiers from {}",
            embedder.model_name(),
            embedder.dimension(),
            artifacts.dir().display()
        );
        Ok(Engine {
            profiles,
            embedder,
            artifacts,
        })
    }
}
