//! Evaluation: join predictions with ground truth and score them.
//!
//! Filenames on the two sides rarely agree byte for byte, so both are reduced
//! to a canonical key before a full outer join. Labels go through the same
//! lexical normalization on both sides before comparison.

pub mod labels;
pub mod metrics;
pub mod reconcile;
pub mod table;

pub use labels::*;
pub use metrics::*;
pub use reconcile::*;
pub use table::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("No prediction matched any ground-truth row ({} predictions, {} ground-truth rows unmatched)", .0.unmatched_predictions, .0.unmatched_truths)]
    NoMatch(NoMatchDiagnostic),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// One classified document, as written to or read from a prediction table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub filename: String,
    pub predicted: String,
    /// Highest class probability, in [0, 1].
    pub confidence: Option<f64>,
    /// Full probability vector keyed by label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<BTreeMap<String, f64>>,
}

impl PredictionRecord {
    pub fn new(filename: impl Into<String>, predicted: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            predicted: predicted.into(),
            confidence: None,
            probabilities: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_probabilities(mut self, probabilities: BTreeMap<String, f64>) -> Self {
        self.probabilities = Some(probabilities);
        self
    }
}

/// Externally supplied correct label for one file, both fields raw.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroundTruthRecord {
    pub filename: String,
    pub label: String,
}

impl GroundTruthRecord {
    pub fn new(filename: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            label: label.into(),
        }
    }
}

/// Reconciliation outcome plus metrics over the matched rows.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub matched: usize,
    pub unmatched_predictions: usize,
    pub unmatched_truths: usize,
    pub duplicate_predictions: usize,
    pub duplicate_truths: usize,
    pub metrics: MetricsSummary,
}

/// Reconcile, normalize labels, and score. Predicted labels join the
/// normalizer's vocabulary so plural ground-truth labels can meet them.
pub fn evaluate(
    predictions: &[PredictionRecord],
    truths: &[GroundTruthRecord],
    options: &ReconcileOptions,
    normalizer: &LabelNormalizer,
) -> Result<EvaluationReport, EvaluationError> {
    let joined = reconcile(predictions, truths, options)?;
    let normalizer = normalizer
        .clone()
        .with_vocabulary(predictions.iter().map(|p| p.predicted.as_str()));
    let metrics = compute_metrics(&joined.matched, &normalizer);

    tracing::info!(
        matched = joined.matched.len(),
        unmatched_predictions = joined.unmatched_predictions.len(),
        unmatched_truths = joined.unmatched_truths.len(),
        accuracy = metrics.accuracy,
        "Evaluation complete"
    );

    Ok(EvaluationReport {
        matched: joined.matched.len(),
        unmatched_predictions: joined.unmatched_predictions.len(),
        unmatched_truths: joined.unmatched_truths.len(),
        duplicate_predictions: joined.duplicate_predictions,
        duplicate_truths: joined.duplicate_truths,
        metrics,
    })
}
