//! Threshold bands over the faithfulness score.
//!
//! | Band | Condition | Answer kept |
//! |------|-----------|-------------|
//! | `disabled` | verification off | yes |
//! | `passed` | `score >= T` | yes |
//! | `warning` | `T * ratio <= score < T` | yes |
//! | `failed` | `score < T * ratio` | no, replaced by a refusal |

use serde::{Deserialize, Serialize};

use crate::config::VerificationConfig;
use crate::faithfulness::VerificationReport;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Disabled,
    Passed,
    Warning,
    Failed,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Disabled => "disabled",
            Band::Passed => "passed",
            Band::Warning => "warning",
            Band::Failed => "failed",
        }
    }
}

/// Decision derived from a [`VerificationReport`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Evaluation {
    pub status: Band,
    pub passed: bool,
    pub message: String,
    /// `None` when verification is disabled.
    pub score: Option<f64>,
    pub unsupported_count: usize,
}

#[derive(Debug, Clone)]
pub struct Scorer {
    enabled: bool,
    pass_threshold: f64,
    warning_ratio: f64,
}

impl Scorer {
    pub fn new(config: &VerificationConfig) -> Self {
        Self {
            enabled: config.enabled,
            pass_threshold: config.pass_threshold,
            warning_ratio: config.warning_ratio,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Evaluation used when verification is switched off.
    pub fn disabled() -> Evaluation {
        Evaluation {
            status: Band::Disabled,
            passed: true,
            message: "Verification disabled".to_string(),
            score: None,
            unsupported_count: 0,
        }
    }

    pub fn evaluate(&self, report: &VerificationReport) -> Evaluation {
        if !self.enabled {
            return Self::disabled();
        }

        let score = report.faithfulness_score;
        let (status, passed, message) = if score >= self.pass_threshold {
            (
                Band::Passed,
                true,
                format!("Answer is faithful to sources (score: {:.2})", score),
            )
        } else if score >= self.pass_threshold * self.warning_ratio {
            (
                Band::Warning,
                true,
                format!(
                    "Answer partially supported (score: {:.2}). Some claims may not be fully verified.",
                    score
                ),
            )
        } else {
            (
                Band::Failed,
                false,
                format!(
                    "Answer has low faithfulness score ({:.2}). Many claims are not supported by the provided materials.",
                    score
                ),
            )
        };

        Evaluation {
            status,
            passed,
            message,
            score: Some(score),
            unsupported_count: report.unsupported_sentences.len(),
        }
    }
}

/// Replacement answer for a failed evaluation.
pub fn refusal_message(evaluation: &Evaluation) -> String {
    format!(
        "I cannot provide a reliable answer to this question based on the available materials. \
         The generated response had a low faithfulness score ({:.2}), indicating that many claims \
         could not be verified against the source documents. Please try rephrasing your question \
         or check if the relevant materials have been uploaded.",
        evaluation.score.unwrap_or(0.0)
    )
}
