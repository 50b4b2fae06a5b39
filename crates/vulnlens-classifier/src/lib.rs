//! VulnLens classifier
//!
//! Per-language random-forest classifiers over snippet embeddings:
//! - [`RandomForest`]: CART ensemble with bootstrap sampling and Gini splits
//! - [`ClassifierArtifact`]: versioned, digest-checked JSON persistence
//! - [`ArtifactStore`]: lazy load-once cache shared by all requests
//! - [`Trainer`]: dataset → normalized text → embeddings → fitted artifact

pub mod artifact;
pub mod forest;
pub mod store;
pub mod training;

pub use artifact::{artifact_path, ClassifierArtifact, FORMAT_VERSION};
pub use forest::{DecisionTree, ForestParams, MaxFeatures, RandomForest};
pub use store::ArtifactStore;
pub use training::{load_dataset, Trainer, TrainingReport};
