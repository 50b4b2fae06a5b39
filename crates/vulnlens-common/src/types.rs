//! Request/response types shared by the analysis engine and the training job.

use serde::{Deserialize, Serialize};

use crate::Language;

// ---------------------------------------------------------------------------
// Lexical matches
// ---------------------------------------------------------------------------

/// One lexical hit: the trimmed source line and the category of the pattern found on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub line: String,
    pub category: String,
}

impl Match {
    pub fn new(line: impl Into<String>, category: impl Into<String>) -> Self {
        Self { line: line.into(), category: category.into() }
    }
}

// ---------------------------------------------------------------------------
// Classifier output
// ---------------------------------------------------------------------------

/// Binary verdict of a classifier artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prediction {
    Safe,
    Unsafe,
}

impl Prediction {
    /// Dataset label for this verdict (Safe = 0, Unsafe = 1).
    pub fn label(&self) -> u8 {
        match self {
            Prediction::Safe   => 0,
            Prediction::Unsafe => 1,
        }
    }

    pub fn from_label(label: i64) -> Option<Self> {
        match label {
            0 => Some(Prediction::Safe),
            1 => Some(Prediction::Unsafe),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// Fixed-length snippet embedding produced by an embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

// ---------------------------------------------------------------------------
// Training data
// ---------------------------------------------------------------------------

/// One labelled record of a training dataset (`{"code": ..., "label": 0|1}`).
///
/// The label is kept wide so that out-of-range values reach dataset
/// validation instead of failing inside the JSON parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub code: String,
    pub label: i64,
}

impl TrainingExample {
    pub fn new(code: impl Into<String>, label: Prediction) -> Self {
        Self { code: code.into(), label: label.label() as i64 }
    }

    pub fn prediction(&self) -> Option<Prediction> {
        Prediction::from_label(self.label)
    }
}

// ---------------------------------------------------------------------------
// Analysis result
// ---------------------------------------------------------------------------

/// Combined output of one analysis request.
///
/// `matches` are in line order, then pattern-table order within a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub language: Language,
    pub matches: Vec<Match>,
    pub prediction: Prediction,
    /// Fraction of ensemble votes for `Unsafe`.
    pub unsafe_probability: f64,
}

impl AnalysisResult {
    pub fn is_unsafe(&self) -> bool {
        self.prediction == Prediction::Unsafe
    }

    /// Distinct categories in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for m in &self.matches {
            if !seen.contains(&m.category.as_str()) {
                seen.push(&m.category);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_prediction_labels() {
        assert_eq!(Prediction::from_label(0), Some(Prediction::Safe));
        assert_eq!(Prediction::from_label(1), Some(Prediction::Unsafe));
        assert_eq!(Prediction::from_label(2), None);
        assert_eq!(Prediction::from_label(-1), None);
        assert_eq!(Prediction::Unsafe.label(), 1);
    }

    #[test]
    fn test_training_example_parses_dataset_record() {
        let records: Vec<TrainingExample> =
            serde_json::from_str(r#"[{"code": "eval(x)", "label": 1}, {"code": "x = 1", "label": 0}]"#)
                .unwrap();
        assert_eq!(records[0].prediction(), Some(Prediction::Unsafe));
        assert_eq!(records[1].prediction(), Some(Prediction::Safe));
    }

    #[test]
    fn test_result_serializes_structured() {
        let result = AnalysisResult {
            language: Language::Python,
            matches: vec![Match::new("os.system(cmd)", "Command Injection")],
            prediction: Prediction::Unsafe,
            unsafe_probability: 0.75,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["language"], "python");
        assert_eq!(json["prediction"], "unsafe");
        assert_eq!(json["matches"][0]["category"], "Command Injection");
    }

    #[test]
    fn test_categories_are_deduplicated_in_order() {
        let result = AnalysisResult {
            language: Language::Java,
            matches: vec![
                Match::new("a", "Reflection"),
                Match::new("b", "File I/O"),
                Match::new("c", "Reflection"),
            ],
            prediction: Prediction::Safe,
            unsafe_probability: 0.1,
        };
        assert_eq!(result.categories(), vec!["Reflection", "File I/O"]);
        assert!(!result.is_unsafe());
    }
}
