use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::Serialize;

use super::{EvaluationError, GroundTruthRecord, PredictionRecord};
use crate::pipeline_config::EvaluationConfig;

/// Extensions removed when keys drop the extension. Restricted to document
/// formats so names like `case.v2` keep their suffix.
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "doc", "txt", "text", "md", "rtf", "png", "jpg", "jpeg", "tif", "tiff", "bmp",
];

fn is_quote(c: char) -> bool {
    matches!(c, '"' | '\'' | '`' | '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}')
}

fn canonical_pass(name: &str, drop_extension: bool) -> String {
    let name = name.trim();
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let mut key = base
        .trim_matches(|c: char| c.is_whitespace() || is_quote(c))
        .to_lowercase();

    if drop_extension {
        while let Some(dot) = key.rfind('.') {
            if dot == 0 || !DOCUMENT_EXTENSIONS.contains(&&key[dot + 1..]) {
                break;
            }
            key.truncate(dot);
        }
        key = key
            .trim_matches(|c: char| c.is_whitespace() || is_quote(c))
            .to_string();
    }
    key
}

/// Join key for a filename: basename, unquoted, trimmed, lowercased,
/// optionally without its document extension. Idempotent.
pub fn canonical_key(name: &str, drop_extension: bool) -> String {
    let mut key = canonical_pass(name, drop_extension);
    loop {
        let next = canonical_pass(&key, drop_extension);
        if next == key {
            return key;
        }
        key = next;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub drop_extension: bool,
    /// Keys reported per side when nothing matches.
    pub diagnostic_sample: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::from(&EvaluationConfig::default())
    }
}

impl From<&EvaluationConfig> for ReconcileOptions {
    fn from(config: &EvaluationConfig) -> Self {
        Self {
            drop_extension: config.drop_extension,
            diagnostic_sample: config.diagnostic_sample,
        }
    }
}

/// A prediction and its ground truth, joined on `key`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRecord {
    pub key: String,
    pub prediction: PredictionRecord,
    pub truth: GroundTruthRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Sorted by key.
    pub matched: Vec<ReconciledRecord>,
    /// Sorted keys present only among predictions. Rows whose name has no
    /// usable key are listed by their raw name.
    pub unmatched_predictions: Vec<String>,
    /// Sorted keys present only in the ground truth.
    pub unmatched_truths: Vec<String>,
    /// Rows dropped because another row on the same side had the same key.
    pub duplicate_predictions: usize,
    pub duplicate_truths: usize,
}

/// Bounded sample of what failed to join.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoMatchDiagnostic {
    pub prediction_keys: Vec<String>,
    pub truth_keys: Vec<String>,
    pub unmatched_predictions: usize,
    pub unmatched_truths: usize,
}

/// Index rows by canonical key. Among rows sharing a key the first by
/// `order` is kept, so the choice never depends on input order. Rows whose
/// name reduces to an empty key are returned apart and never join.
fn index_by_key<'a, T>(
    rows: &'a [T],
    filename: impl Fn(&T) -> &str,
    order: impl Fn(&T, &T) -> Ordering,
    drop_extension: bool,
) -> (BTreeMap<String, &'a T>, Vec<String>, usize) {
    let mut index: BTreeMap<String, &T> = BTreeMap::new();
    let mut unkeyed = Vec::new();
    let mut duplicates = 0;
    for row in rows {
        let key = canonical_key(filename(row), drop_extension);
        if key.is_empty() {
            unkeyed.push(filename(row).to_string());
            continue;
        }
        match index.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
            Entry::Occupied(mut slot) => {
                duplicates += 1;
                if order(row, slot.get()) == Ordering::Less {
                    slot.insert(row);
                }
            }
        }
    }
    (index, unkeyed, duplicates)
}

fn cmp_score(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

/// Total order over prediction rows: name, label, confidence, then the
/// probability vector entry by entry.
fn prediction_order(a: &PredictionRecord, b: &PredictionRecord) -> Ordering {
    a.filename
        .cmp(&b.filename)
        .then_with(|| a.predicted.cmp(&b.predicted))
        .then_with(|| cmp_score(a.confidence, b.confidence))
        .then_with(|| match (&a.probabilities, &b.probabilities) {
            (Some(pa), Some(pb)) => pa
                .iter()
                .zip(pb)
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| va.total_cmp(vb)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| pa.len().cmp(&pb.len())),
            (pa, pb) => pa.is_some().cmp(&pb.is_some()),
        })
}

/// Full outer join of predictions and ground truth on canonical key.
pub fn reconcile(
    predictions: &[PredictionRecord],
    truths: &[GroundTruthRecord],
    options: &ReconcileOptions,
) -> Result<Reconciliation, EvaluationError> {
    let (predicted, unkeyed_predictions, duplicate_predictions) = index_by_key(
        predictions,
        |p| p.filename.as_str(),
        prediction_order,
        options.drop_extension,
    );
    let (expected, unkeyed_truths, duplicate_truths) = index_by_key(
        truths,
        |t| t.filename.as_str(),
        |a, b| a.cmp(b),
        options.drop_extension,
    );

    let mut matched = Vec::new();
    let mut unmatched_predictions = unkeyed_predictions;
    for (key, prediction) in &predicted {
        match expected.get(key) {
            Some(truth) => matched.push(ReconciledRecord {
                key: key.clone(),
                prediction: (*prediction).clone(),
                truth: (*truth).clone(),
            }),
            None => unmatched_predictions.push(key.clone()),
        }
    }
    let mut unmatched_truths = unkeyed_truths;
    unmatched_truths.extend(
        expected
            .keys()
            .filter(|k| !predicted.contains_key(*k))
            .cloned(),
    );
    unmatched_predictions.sort();
    unmatched_truths.sort();

    if duplicate_predictions + duplicate_truths > 0 {
        tracing::warn!(
            duplicate_predictions,
            duplicate_truths,
            "Duplicate canonical keys dropped"
        );
    }

    if matched.is_empty() {
        let sample = options.diagnostic_sample;
        let diagnostic = NoMatchDiagnostic {
            prediction_keys: unmatched_predictions.iter().take(sample).cloned().collect(),
            truth_keys: unmatched_truths.iter().take(sample).cloned().collect(),
            unmatched_predictions: unmatched_predictions.len(),
            unmatched_truths: unmatched_truths.len(),
        };
        tracing::warn!(
            prediction_keys = ?diagnostic.prediction_keys,
            truth_keys = ?diagnostic.truth_keys,
            "No canonical key shared between predictions and ground truth"
        );
        return Err(EvaluationError::NoMatch(diagnostic));
    }

    Ok(Reconciliation {
        matched,
        unmatched_predictions,
        unmatched_truths,
        duplicate_predictions,
        duplicate_truths,
    })
}
