use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::{LabelNormalizer, ReconciledRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassReport {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Rows are true labels, columns predicted labels, both in `labels` order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn get(&self, truth: &str, predicted: &str) -> usize {
        let row = self.labels.iter().position(|l| l == truth);
        let col = self.labels.iter().position(|l| l == predicted);
        match (row, col) {
            (Some(r), Some(c)) => self.counts[r][c],
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceSummary {
    /// Mean reported confidence over rows that carry one.
    pub mean_confidence: Option<f64>,
    /// Per true class, mean probability the model gave that class.
    pub true_class_probability: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total: usize,
    pub accuracy: f64,
    pub weighted_precision: f64,
    pub weighted_recall: f64,
    pub weighted_f1: f64,
    pub per_class: BTreeMap<String, ClassReport>,
    pub confusion: ConfusionMatrix,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceSummary>,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Accuracy, per-class and support-weighted precision/recall/F1, and the
/// confusion matrix over the sorted union of labels. Undefined ratios are 0.
pub fn score_labels<S: AsRef<str>>(y_true: &[S], y_pred: &[S]) -> MetricsSummary {
    let labels: Vec<String> = y_true
        .iter()
        .chain(y_pred)
        .map(|l| l.as_ref().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let index: BTreeMap<&str, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();

    let mut counts = vec![vec![0usize; labels.len()]; labels.len()];
    for (t, p) in y_true.iter().zip(y_pred) {
        counts[index[t.as_ref()]][index[p.as_ref()]] += 1;
    }

    let total = y_true.len().min(y_pred.len());
    let correct: usize = (0..labels.len()).map(|i| counts[i][i]).sum();

    let mut per_class = BTreeMap::new();
    let (mut wp, mut wr, mut wf) = (0.0, 0.0, 0.0);
    for (i, label) in labels.iter().enumerate() {
        let tp = counts[i][i];
        let support: usize = counts[i].iter().sum();
        let predicted: usize = counts.iter().map(|row| row[i]).sum();
        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        let weight = ratio(support, total);
        wp += weight * precision;
        wr += weight * recall;
        wf += weight * f1;
        per_class.insert(
            label.clone(),
            ClassReport {
                precision,
                recall,
                f1,
                support,
            },
        );
    }

    MetricsSummary {
        total,
        accuracy: ratio(correct, total),
        weighted_precision: wp,
        weighted_recall: wr,
        weighted_f1: wf,
        per_class,
        confusion: ConfusionMatrix { labels, counts },
        confidence: None,
    }
}

/// Score matched rows after label normalization on both sides.
pub fn compute_metrics(matched: &[ReconciledRecord], normalizer: &LabelNormalizer) -> MetricsSummary {
    let y_true: Vec<String> = matched
        .iter()
        .map(|m| normalizer.normalize(&m.truth.label))
        .collect();
    let y_pred: Vec<String> = matched
        .iter()
        .map(|m| normalizer.normalize(&m.prediction.predicted))
        .collect();

    let mut summary = score_labels(&y_true, &y_pred);
    summary.confidence = confidence_summary(matched, &y_true, &y_pred, normalizer);
    summary
}

fn confidence_summary(
    matched: &[ReconciledRecord],
    y_true: &[String],
    y_pred: &[String],
    normalizer: &LabelNormalizer,
) -> Option<ConfidenceSummary> {
    let confidences: Vec<f64> = matched
        .iter()
        .filter_map(|m| m.prediction.confidence)
        .collect();

    let mut per_class: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for ((record, truth), predicted) in matched.iter().zip(y_true).zip(y_pred) {
        let p = match &record.prediction.probabilities {
            Some(probabilities) => probabilities
                .iter()
                .filter(|(label, _)| normalizer.normalize(label) == *truth)
                .map(|(_, p)| *p)
                .sum::<f64>(),
            None if truth == predicted => match record.prediction.confidence {
                Some(c) => c,
                None => continue,
            },
            None => continue,
        };
        let entry = per_class.entry(truth.clone()).or_default();
        entry.0 += p;
        entry.1 += 1;
    }

    if confidences.is_empty() && per_class.is_empty() {
        return None;
    }
    Some(ConfidenceSummary {
        mean_confidence: (!confidences.is_empty())
            .then(|| confidences.iter().sum::<f64>() / confidences.len() as f64),
        true_class_probability: per_class
            .into_iter()
            .map(|(label, (sum, n))| (label, sum / n as f64))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::evaluation::{GroundTruthRecord, PredictionRecord};

    #[test]
    fn two_class_confusion_and_accuracy() {
        let y_true = ["a", "a", "b", "b"];
        let y_pred = ["a", "b", "b", "b"];
        let m = score_labels(&y_true, &y_pred);
        assert_eq!(m.confusion.labels, vec!["a", "b"]);
        assert_eq!(m.confusion.counts, vec![vec![1, 1], vec![0, 2]]);
        assert_eq!(m.accuracy, 0.75);

        let a = &m.per_class["a"];
        assert_eq!((a.precision, a.recall, a.support), (1.0, 0.5, 2));
        let b = &m.per_class["b"];
        assert!((b.precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(b.recall, 1.0);
        // Weighted by support 2/2.
        assert!((m.weighted_recall - 0.75).abs() < 1e-12);
    }

    #[test]
    fn predicted_only_label_joins_matrix_with_zero_support() {
        let m = score_labels(&["a", "a"], &["a", "z"]);
        assert_eq!(m.confusion.labels, vec!["a", "z"]);
        assert_eq!(m.per_class["z"].support, 0);
        assert_eq!(m.per_class["z"].precision, 0.0);
        assert_eq!(m.confusion.get("a", "z"), 1);
        // z carries no weight.
        assert!((m.weighted_precision - 1.0).abs() < 1e-12);
    }

    fn matched(name: &str, truth: &str, prediction: PredictionRecord) -> ReconciledRecord {
        ReconciledRecord {
            key: name.to_string(),
            prediction,
            truth: GroundTruthRecord::new(name, truth),
        }
    }

    #[test]
    fn labels_are_normalized_before_scoring() {
        let rows = vec![
            matched("1", "Petitions", PredictionRecord::new("1", "petition")),
            matched("2", "contract", PredictionRecord::new("2", "CONTRACTS")),
        ];
        let m = compute_metrics(&rows, &LabelNormalizer::default());
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.confusion.labels, vec!["contract", "petition"]);
        assert!(m.confidence.is_none());
    }

    #[test]
    fn confidence_aggregates() {
        let probs: BTreeMap<String, f64> =
            [("contract".to_string(), 0.3), ("petition".to_string(), 0.7)].into();
        let rows = vec![
            matched(
                "1",
                "contract",
                PredictionRecord::new("1", "petition")
                    .with_confidence(0.7)
                    .with_probabilities(probs),
            ),
            matched(
                "2",
                "contract",
                PredictionRecord::new("2", "contract").with_confidence(0.9),
            ),
            // Wrong and without probabilities: no true-class estimate.
            matched(
                "3",
                "petition",
                PredictionRecord::new("3", "contract").with_confidence(0.5),
            ),
        ];
        let m = compute_metrics(&rows, &LabelNormalizer::default());
        let c = m.confidence.unwrap();
        assert!((c.mean_confidence.unwrap() - 0.7).abs() < 1e-12);
        assert!((c.true_class_probability["contract"] - 0.6).abs() < 1e-12);
        assert!(!c.true_class_probability.contains_key("petition"));
    }
}
