//! Configuration loading for VulnLens.
//! Reads vulnlens.toml from the current directory or the path in the VULNLENS_CONFIG env var.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vulnlens_classifier::ForestParams;
use vulnlens_common::{Result, VulnLensError};
use vulnlens_embed::EmbeddingConfig;

pub const CONFIG_ENV: &str = "VULNLENS_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "vulnlens.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub training: ForestParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory holding `<language>_model.json`.
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
}

fn default_artifact_dir() -> PathBuf { PathBuf::from("models") }

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self { dir: default_artifact_dir() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Directory of `<language>.toml` files overriding the built-in pattern tables.
    #[serde(default)]
    pub patterns_dir: Option<PathBuf>,
}

impl Settings {
    /// Load configuration.
    /// Uses the VULNLENS_CONFIG path when set (which must then exist),
    /// otherwise vulnlens.toml in the current directory if present, otherwise defaults.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => Self::from_file_or_default(Path::new(DEFAULT_CONFIG_FILE)),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VulnLensError::Config(format!(
                "Config file not found: {}\nCopy vulnlens.example.toml to vulnlens.toml and edit it.",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| VulnLensError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_file_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)
            .map_err(|e| VulnLensError::Config(e.to_string()))?;
        settings.training.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests;
