//! Line-by-line lexical tagging against an ordered pattern table.

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};

use vulnlens_common::{Match, Result, VulnLensError};

/// One table entry: a literal, case-sensitive substring and the category it reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: String,
    pub category: String,
}

impl PatternRule {
    pub fn new(pattern: impl Into<String>, category: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), category: category.into() }
    }
}

/// Ordered pattern table with an Aho-Corasick prefilter over all patterns.
///
/// The automaton only answers "does this line contain anything at all";
/// reporting walks the table in order so every (line, pattern) pair is
/// emitted exactly once, duplicates and overlaps included.
#[derive(Debug, Clone)]
pub struct PatternTable {
    rules: Vec<PatternRule>,
    prefilter: AhoCorasick,
}

impl PatternTable {
    pub fn new(rules: Vec<PatternRule>) -> Result<Self> {
        if let Some(rule) = rules.iter().find(|r| r.pattern.is_empty()) {
            return Err(VulnLensError::Config(format!(
                "empty pattern for category {:?}",
                rule.category
            )));
        }

        let prefilter = AhoCorasick::new(rules.iter().map(|r| r.pattern.as_str()))
            .map_err(|e| VulnLensError::Config(format!("pattern automaton: {e}")))?;

        Ok(Self { rules, prefilter })
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Tag normalized text.
///
/// Output order is line order, then table order within a line. Each match
/// carries the trimmed line; containment is tested on the untrimmed line.
pub fn tag(normalized: &str, table: &PatternTable) -> Vec<Match> {
    let mut matches = Vec::new();

    for line in normalized.split('\n') {
        if !table.prefilter.is_match(line) {
            continue;
        }
        let trimmed = line.trim();
        for rule in &table.rules {
            if line.contains(rule.pattern.as_str()) {
                matches.push(Match::new(trimmed, rule.category.as_str()));
            }
        }
    }

    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> PatternTable {
        PatternTable::new(vec![
            PatternRule::new("exec(", "Dynamic Code Execution"),
            PatternRule::new("shell_exec(", "Command Injection"),
            PatternRule::new("system(", "Command Injection"),
        ])
        .unwrap()
    }

    #[test]
    fn test_reports_every_pattern_on_a_line_in_table_order() {
        let matches = tag("$out = shell_exec($cmd); system($x);", &table());
        assert_eq!(
            matches,
            vec![
                // `exec(` is a substring of `shell_exec(`.
                Match::new("$out = shell_exec($cmd); system($x);", "Dynamic Code Execution"),
                Match::new("$out = shell_exec($cmd); system($x);", "Command Injection"),
                Match::new("$out = shell_exec($cmd); system($x);", "Command Injection"),
            ]
        );
    }

    #[test]
    fn test_line_order_and_silent_lines() {
        let matches = tag("system(a)\n$x = 1;\nexec(b)", &table());
        let lines: Vec<&str> = matches.iter().map(|m| m.line.as_str()).collect();
        assert_eq!(lines, vec!["system(a)", "exec(b)"]);
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        assert!(tag("SYSTEM(a)", &table()).is_empty());
    }

    #[test]
    fn test_line_is_trimmed_in_output() {
        let matches = tag("   system(a)   ", &table());
        assert_eq!(matches[0].line, "system(a)");
    }

    #[test]
    fn test_empty_table_and_text() {
        let empty = PatternTable::new(vec![]).unwrap();
        assert!(empty.is_empty());
        assert!(tag("system(a)", &empty).is_empty());
        assert!(tag("", &table()).is_empty());
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let err = PatternTable::new(vec![PatternRule::new("", "Anything")]);
        assert!(matches!(err, Err(VulnLensError::Config(_))));
    }
}
