//! Snippet normalization: comment stripping and whitespace collapsing.

use regex::Regex;
use serde::{Deserialize, Serialize};

use vulnlens_common::{Result, VulnLensError};

/// Comment syntax stripped from a language's snippets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRules {
    /// `(open, close)` delimiter pairs. Matching is non-greedy and spans
    /// newlines; an unterminated comment runs to the end of the text.
    #[serde(default)]
    pub block: Vec<(String, String)>,

    /// Markers that comment out the rest of their line.
    #[serde(default)]
    pub line: Vec<String>,
}

/// Compiled form of [`CommentRules`].
#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Block strippers first, then line strippers, in declaration order.
    strippers: Vec<Regex>,
    newline_runs: Regex,
}

impl Normalizer {
    pub fn new(rules: &CommentRules) -> Result<Self> {
        let mut strippers = Vec::with_capacity(rules.block.len() + rules.line.len());

        for (open, close) in &rules.block {
            if open.is_empty() || close.is_empty() {
                return Err(VulnLensError::Config(
                    "block comment delimiters must not be empty".to_string(),
                ));
            }
            strippers.push(compile(&format!(
                r"(?s){}.*?(?:{}|\z)",
                regex::escape(open),
                regex::escape(close)
            ))?);
        }

        for marker in &rules.line {
            if marker.is_empty() {
                return Err(VulnLensError::Config(
                    "line comment marker must not be empty".to_string(),
                ));
            }
            strippers.push(compile(&format!(r"{}[^\n]*", regex::escape(marker)))?);
        }

        Ok(Self {
            strippers,
            newline_runs: compile(r"\s*\n\s*")?,
        })
    }

    /// Normalize a raw snippet.
    ///
    /// Passes repeat until the text stops changing, which makes the result
    /// idempotent even when removing one comment exposes another delimiter.
    pub fn normalize(&self, raw: &str) -> String {
        let mut current = self.pass(raw);
        // Every pass either shortens the text or leaves it unchanged.
        loop {
            let next = self.pass(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn pass(&self, text: &str) -> String {
        let mut out = text.to_string();
        for stripper in &self.strippers {
            out = stripper.replace_all(&out, "").into_owned();
        }
        self.newline_runs.replace_all(&out, "\n").trim().to_string()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| VulnLensError::Config(format!("comment rule {pattern:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn c_and_hash() -> Normalizer {
        Normalizer::new(&CommentRules {
            block: vec![("/*".to_string(), "*/".to_string())],
            line: vec!["//".to_string(), "#".to_string()],
        })
        .unwrap()
    }

    #[test]
    fn test_strips_block_and_line_comments() {
        let n = c_and_hash();
        let raw = "x = 1  # set x\n/* multi\n   line */\ny = 2 // trailing\n";
        assert_eq!(n.normalize(raw), "x = 1\ny = 2");
    }

    #[test]
    fn test_block_comment_is_non_greedy() {
        let n = c_and_hash();
        assert_eq!(n.normalize("a /* one */ b /* two */ c"), "a  b  c");
    }

    #[test]
    fn test_unterminated_block_consumes_rest() {
        let n = c_and_hash();
        assert_eq!(n.normalize("keep();\n/* never closed\nlost();"), "keep();");
    }

    #[test]
    fn test_collapses_whitespace_around_newlines() {
        let n = c_and_hash();
        assert_eq!(n.normalize("  a = 1   \n\n\t\n    b = 2\n  "), "a = 1\nb = 2");
    }

    #[test]
    fn test_exposed_delimiters_are_stripped() {
        let n = c_and_hash();
        // Removing `/*a*/` joins `x/` and `* b */y` into a fresh block comment.
        assert_eq!(n.normalize("x//*a*/* b */y"), "xy");
        let once = n.normalize("q /*/*a*/ */ r");
        assert_eq!(n.normalize(&once), once);
    }

    #[test]
    fn test_without_hash_rule_keeps_hash() {
        let n = Normalizer::new(&CommentRules {
            block: vec![("/*".to_string(), "*/".to_string())],
            line: vec!["//".to_string()],
        })
        .unwrap();
        assert_eq!(n.normalize("int x = 1; # not a comment"), "int x = 1; # not a comment");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(c_and_hash().normalize(""), "");
        assert_eq!(c_and_hash().normalize(" \n # only a comment \n"), "");
    }

    #[test]
    fn test_rejects_empty_marker() {
        let err = Normalizer::new(&CommentRules { block: vec![], line: vec![String::new()] });
        assert!(matches!(err, Err(VulnLensError::Config(_))));
    }
}
