//! Accuracy of generated responses against reference answers

use std::fmt;
use std::io::BufRead;

use serde::Deserialize;
use tracing::warn;

use crate::score::extract_answer;
use crate::{Result, RewardError};

/// Model output: one response or several samples
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Responses {
    One(String),
    Many(Vec<String>),
}

impl Responses {
    /// The response that is graded; the first sample when there are several
    fn graded(&self) -> Option<&str> {
        match self {
            Self::One(s) => Some(s),
            Self::Many(all) => all.first().map(String::as_str),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GroundTruth {
    ground_truth: String,
}

#[derive(Debug, Deserialize)]
struct ResponseRow {
    responses: Responses,
    reward_model: GroundTruth,
}

/// Graded totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accuracy {
    /// Rows graded
    pub total: usize,
    /// Rows whose extracted answer equals the ground truth
    pub correct: usize,
}

impl Accuracy {
    /// Fraction correct; 0 when nothing was graded
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {}, Correct: {}, Accuracy: {:.4}%",
            self.total,
            self.correct,
            self.ratio() * 100.0
        )
    }
}

/// Grade a JSON-lines file of `{responses, reward_model: {ground_truth}}`
/// rows. Blank lines are skipped.
pub fn evaluate_responses<R: BufRead>(reader: R) -> Result<Accuracy> {
    let mut accuracy = Accuracy::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let row: ResponseRow = serde_json::from_str(&line).map_err(|source| RewardError::Json {
            line: line_no + 1,
            source,
        })?;

        accuracy.total += 1;
        let Some(response) = row.responses.graded() else {
            warn!(line = line_no + 1, "row has no responses");
            continue;
        };
        if extract_answer(response).as_deref() == Some(row.reward_model.ground_truth.as_str()) {
            accuracy.correct += 1;
        }
    }

    Ok(accuracy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate() {
        let input = r#"{"responses": "<answer>72</answer>", "reward_model": {"ground_truth": "72"}}
{"responses": "<answer>1,000</answer>", "reward_model": {"ground_truth": "1000", "style": "rule"}}
{"responses": "72", "reward_model": {"ground_truth": "72"}}

{"responses": ["<answer>5</answer>", "<answer>6</answer>"], "reward_model": {"ground_truth": "6"}}
"#;
        let accuracy = evaluate_responses(input.as_bytes()).unwrap();
        assert_eq!(
            accuracy,
            Accuracy {
                total: 4,
                correct: 2
            }
        );
        assert_eq!(
            accuracy.to_string(),
            "Total: 4, Correct: 2, Accuracy: 50.0000%"
        );
    }

    #[test]
    fn test_empty_input() {
        let accuracy = evaluate_responses(&b""[..]).unwrap();
        assert_eq!(accuracy.total, 0);
        assert_eq!(accuracy.ratio(), 0.0);
    }

    #[test]
    fn test_empty_sample_list_counts_as_wrong() {
        let input = r#"{"responses": [], "reward_model": {"ground_truth": "1"}}"#;
        let accuracy = evaluate_responses(input.as_bytes()).unwrap();
        assert_eq!(accuracy, Accuracy { total: 1, correct: 0 });
    }

    #[test]
    fn test_malformed_row() {
        let input = "{\"responses\": \"x\"}\n";
        let err = evaluate_responses(input.as_bytes()).unwrap_err();
        assert!(matches!(err, RewardError::Json { line: 1, .. }));
    }
}
