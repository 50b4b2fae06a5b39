//! The closed set of languages VulnLens can analyse.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::VulnLensError;

/// A supported source language.
///
/// Adding a language means adding a variant here plus its profile file in
/// `vulnlens-rules`; nothing downstream matches on the variant list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Php,
    JavaScript,
    Java,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Php,
        Language::JavaScript,
        Language::Java,
    ];

    /// Stable identifier used in config files, artifact names and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python     => "python",
            Language::Php        => "php",
            Language::JavaScript => "javascript",
            Language::Java       => "java",
        }
    }

    /// Conventional source file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python     => "py",
            Language::Php        => "php",
            Language::JavaScript => "js",
            Language::Java       => "java",
        }
    }

    /// Guess the language from a file path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ALL.into_iter().find(|lang| lang.extension().eq_ignore_ascii_case(ext))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = VulnLensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|lang| lang.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| VulnLensError::UnsupportedLanguage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_identifier() {
        for lang in Language::ALL {
            assert_eq!(lang.as_str().parse::<Language>().unwrap(), lang);
        }
        assert_eq!("  JavaScript ".parse::<Language>().unwrap(), Language::JavaScript);
    }

    #[test]
    fn test_unknown_language_is_rejected() {
        let err = "cobol".parse::<Language>().unwrap_err();
        assert!(matches!(err, VulnLensError::UnsupportedLanguage(ref s) if s == "cobol"));
    }

    #[test]
    fn test_from_path() {
        assert_eq!(Language::from_path(Path::new("src/app.PY")), Some(Language::Python));
        assert_eq!(Language::from_path(Path::new("Main.java")), Some(Language::Java));
        assert_eq!(Language::from_path(Path::new("README")), None);
    }
}
