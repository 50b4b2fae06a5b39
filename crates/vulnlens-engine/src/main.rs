//! `vulnlens` batch binary: analyze a file, tag a file, or train a language's classifier.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vulnlens_classifier::load_dataset;
use vulnlens_common::Language;
use vulnlens_embed::EmbeddingConfig;
use vulnlens_engine::{Engine, Settings};
use vulnlens_rules::ProfileSet;

/// Exit status of `analyze --fail-on-unsafe` when the snippet is flagged.
const EXIT_UNSAFE: i32 = 2;

#[derive(Parser)]
#[command(name = "vulnlens")]
#[command(about = "Flag potentially unsafe code with lexical rules and a learned classifier")]
#[command(version)]
struct Cli {
    /// Path to vulnlens.toml
    #[arg(short, long, env = "VULNLENS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    model: ModelArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the `[embedding]` table.
#[derive(Args, Default)]
struct ModelArgs {
    /// Hugging Face model ID
    #[arg(long, global = true)]
    model: Option<String>,

    /// Load the model from this directory instead of the Hub
    #[arg(long, env = "VULNLENS_MODEL_DIR", global = true)]
    model_dir: Option<String>,

    /// Maximum tokens per snippet
    #[arg(long, global = true)]
    max_length: Option<usize>,

    /// Run the encoder on CUDA or Metal when available
    #[arg(long, global = true)]
    gpu: bool,
}

impl ModelArgs {
    fn apply(&self, mut config: EmbeddingConfig) -> EmbeddingConfig {
        if let Some(model) = &self.model {
            config = config.with_model(model.as_str());
        }
        if let Some(dir) = &self.model_dir {
            config = config.with_local_dir(dir.as_str());
        }
        if let Some(length) = self.max_length {
            config = config.with_max_length(length);
        }
        if self.gpu {
            config.use_gpu = true;
        }
        config
    }
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a source file and print the result as JSON
    Analyze {
        /// Defaults to the language of the file extension
        #[arg(short, long)]
        language: Option<String>,
        file: PathBuf,
        /// Exit with status 2 when the classifier says unsafe
        #[arg(long)]
        fail_on_unsafe: bool,
    },
    /// Run only normalization and pattern tagging (no model needed)
    Tag {
        /// Defaults to the language of the file extension
        #[arg(short, long)]
        language: Option<String>,
        file: PathBuf,
    },
    /// Train and persist the classifier for one language
    Train {
        #[arg(short, long)]
        language: String,
        /// JSON array of {"code": ..., "label": 0|1}; defaults to datasets/<language>.json
        #[arg(short, long)]
        dataset: Option<PathBuf>,
    },
}

/// An explicit `--language` wins; otherwise the file extension decides.
fn resolve_language(language: Option<&str>, file: &Path) -> anyhow::Result<Language> {
    match language {
        Some(language) => Ok(language.parse()?),
        None => Language::from_path(file).with_context(|| {
            format!("cannot infer the language of {}; pass --language", file.display())
        }),
    }
}

fn read_source(file: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vulnlens=info,warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::from_file_or_default(Path::new(vulnlens_engine::config::DEFAULT_CONFIG_FILE)),
    }
    .context("loading configuration")?;
    settings.embedding = cli.model.apply(settings.embedding);

    match cli.command {
        Command::Tag { language, file } => {
            let language = resolve_language(language.as_deref(), &file)?;
            let raw = read_source(&file)?;
            let profiles = ProfileSet::load(settings.rules.patterns_dir.as_deref())?;
            let matches = profiles.get(language)?.scan(&raw);
            println!("{}", serde_json::to_string_pretty(&matches)?);
        }
        Command::Analyze { language, file, fail_on_unsafe } => {
            let language = resolve_language(language.as_deref(), &file)?;
            let raw = read_source(&file)?;
            let engine = Engine::from_settings(&settings).await?;
            let result = engine.analyze_language(language, &raw).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);

            if result.is_unsafe() {
                warn!(
                    "{} flagged as unsafe (p={:.3}); pattern categories: [{}]",
                    file.display(),
                    result.unsafe_probability,
                    result.categories().join(", ")
                );
                if fail_on_unsafe {
                    std::process::exit(EXIT_UNSAFE);
                }
            }
        }
        Command::Train { language, dataset } => {
            let language: Language = language.parse()?;
            let dataset = dataset.unwrap_or_else(|| {
                PathBuf::from("datasets").join(format!("{}.json", language.as_str()))
            });
            let examples = load_dataset(&dataset)
                .with_context(|| format!("reading dataset {}", dataset.display()))?;
            info!("Training {} classifier on {} examples", language, examples.len());

            let engine = Engine::from_settings(&settings).await?;
            let report = engine
                .train(language, &examples, settings.training.clone())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_language_from_extension() {
        assert_eq!(resolve_language(None, Path::new("src/app.PY")).unwrap(), Language::Python);
        assert_eq!(resolve_language(None, Path::new("index.php")).unwrap(), Language::Php);
        assert_eq!(resolve_language(None, Path::new("Main.java")).unwrap(), Language::Java);
    }

    #[test]
    fn test_explicit_language_wins() {
        assert_eq!(
            resolve_language(Some("JavaScript"), Path::new("snippet.txt")).unwrap(),
            Language::JavaScript
        );
        assert!(resolve_language(Some("cobol"), Path::new("a.py")).is_err());
    }

    #[test]
    fn test_unknown_extension_needs_language() {
        let err = resolve_language(None, Path::new("Makefile")).unwrap_err();
        assert!(err.to_string().contains("--language"));
    }

    #[test]
    fn test_model_overrides() {
        let base = EmbeddingConfig::default();
        let untouched = ModelArgs::default().apply(base.clone());
        assert_eq!(untouched.model_id, base.model_id);
        assert!(!untouched.use_gpu);

        let args = ModelArgs {
            model: Some("microsoft/unixcoder-base".to_string()),
            model_dir: Some("/opt/models/unixcoder".to_string()),
            max_length: Some(256),
            gpu: true,
        };
        let cfg = args.apply(base);
        assert_eq!(cfg.model_id, "microsoft/unixcoder-base");
        assert_eq!(cfg.local_dir.as_deref(), Some("/opt/models/unixcoder"));
        assert_eq!(cfg.max_length, 256);
        assert!(cfg.use_gpu);
        assert_eq!(cfg.batch_size, 16);
    }

    #[test]
    fn test_cli_parses_without_language() {
        let cli = Cli::try_parse_from(["vulnlens", "tag", "upload.php"]).unwrap();
        assert!(matches!(cli.command, Command::Tag { language: None, .. }));
    }
}
