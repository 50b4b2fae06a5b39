//! Language profiles: normalization rules plus the pattern table, loaded from TOML.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use vulnlens_common::{Language, Match, Result, VulnLensError};

use crate::normalize::{CommentRules, Normalizer};
use crate::tagger::{tag, PatternRule, PatternTable};

/// On-disk shape of `patterns/<language>.toml`.
#[derive(Debug, Deserialize)]
struct ProfileFile {
    language: Language,
    /// Absent means "keep the built-in comment syntax for this language".
    #[serde(default)]
    comments: Option<CommentRules>,
    #[serde(default)]
    patterns: Vec<PatternRule>,
}

impl ProfileFile {
    fn parse(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| VulnLensError::Config(format!("profile: {e}")))
    }
}

fn builtin_source(language: Language) -> &'static str {
    match language {
        Language::Python     => include_str!("../patterns/python.toml"),
        Language::Php        => include_str!("../patterns/php.toml"),
        Language::JavaScript => include_str!("../patterns/javascript.toml"),
        Language::Java       => include_str!("../patterns/java.toml"),
    }
}

/// Normalization rules and pattern table for one language.
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    language: Language,
    comments: CommentRules,
    normalizer: Normalizer,
    table: PatternTable,
}

impl LanguageProfile {
    pub fn new(language: Language, comments: CommentRules, patterns: Vec<PatternRule>) -> Result<Self> {
        Ok(Self {
            language,
            normalizer: Normalizer::new(&comments)?,
            comments,
            table: PatternTable::new(patterns)?,
        })
    }

    /// The profile compiled into the binary.
    pub fn builtin(language: Language) -> Result<Self> {
        let file = ProfileFile::parse(builtin_source(language))?;
        if file.language != language {
            return Err(VulnLensError::Config(format!(
                "built-in profile for {language} declares language {}",
                file.language
            )));
        }
        let comments = file.comments.ok_or_else(|| {
            VulnLensError::Config(format!("built-in profile for {language} has no [comments] table"))
        })?;
        Self::new(language, comments, file.patterns)
    }

    /// Parse a profile. A file without a `[comments]` table inherits the
    /// built-in comment rules of the language it declares.
    pub fn from_toml(source: &str) -> Result<Self> {
        let file = ProfileFile::parse(source)?;
        let comments = match file.comments {
            Some(comments) => comments,
            None => Self::builtin(file.language)?.comments,
        };
        Self::new(file.language, comments, file.patterns)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
            .map_err(|e| VulnLensError::Config(format!("{}: {e}", path.display())))
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn comment_rules(&self) -> &CommentRules {
        &self.comments
    }

    pub fn pattern_table(&self) -> &PatternTable {
        &self.table
    }

    pub fn normalize(&self, raw: &str) -> String {
        self.normalizer.normalize(raw)
    }

    /// Tag text that has already been normalized with this profile.
    pub fn tag(&self, normalized: &str) -> Vec<Match> {
        tag(normalized, &self.table)
    }

    /// Normalize then tag.
    pub fn scan(&self, raw: &str) -> Vec<Match> {
        self.tag(&self.normalize(raw))
    }
}

/// One profile per supported language, shared read-only by analysis and training.
#[derive(Debug, Clone)]
pub struct ProfileSet {
    profiles: HashMap<Language, Arc<LanguageProfile>>,
}

impl ProfileSet {
    /// All compiled-in profiles.
    pub fn builtin() -> Result<Self> {
        Self::load(None)
    }

    /// Load profiles, preferring `<dir>/<language>.toml` over the built-in table.
    ///
    /// A missing directory or file falls back to the built-in profile; a file
    /// that exists but fails to parse is an error.
    pub fn load(patterns_dir: Option<&Path>) -> Result<Self> {
        let dir = match patterns_dir {
            Some(dir) if dir.is_dir() => Some(dir),
            Some(dir) => {
                warn!("Pattern directory {} not found, using built-in tables", dir.display());
                None
            }
            None => None,
        };

        let mut profiles = HashMap::with_capacity(Language::ALL.len());
        for language in Language::ALL {
            let path = dir.map(|d| d.join(format!("{}.toml", language.as_str())));
            let profile = match path {
                Some(path) if path.is_file() => {
                    let profile = LanguageProfile::from_file(&path)?;
                    if profile.language() != language {
                        return Err(VulnLensError::Config(format!(
                            "{} declares language {}, expected {language}",
                            path.display(),
                            profile.language()
                        )));
                    }
                    info!("Loaded {language} patterns from {}", path.display());
                    profile
                }
                _ => LanguageProfile::builtin(language)?,
            };
            debug!("{language}: {} patterns", profile.pattern_table().len());
            profiles.insert(language, Arc::new(profile));
        }

        Ok(Self { profiles })
    }

    pub fn get(&self, language: Language) -> Result<&Arc<LanguageProfile>> {
        self.profiles
            .get(&language)
            .ok_or_else(|| VulnLensError::UnsupportedLanguage(language.to_string()))
    }
}
