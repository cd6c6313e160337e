//! Probabilistic classifiers over selected feature matrices.
//!
//! Both families commit to a sorted `LabelSet` at fit time; probability rows
//! are indexed to it and always sum to one.

pub mod calibration;
pub mod forest;
pub mod linear;

pub use calibration::*;
pub use forest::*;
pub use linear::*;

use std::fmt;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::features::FeatureMatrix;
use crate::pipeline_config::ClassifierConfig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("Classifier used before fit")]
    NotFit,

    #[error("Classifier expects {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Insufficient training data: {0}")]
    InsufficientData(String),

    #[error("{rows} rows but {labels} labels")]
    LabelCountMismatch { rows: usize, labels: usize },
}

// ═══════════════════════════════════════════════════════════
// Label set
// ═══════════════════════════════════════════════════════════

/// Sorted, de-duplicated class labels. Index = probability column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn from_labels<L: AsRef<str>>(labels: &[L]) -> Self {
        let mut set: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        set.sort();
        set.dedup();
        Self(set)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn label(&self, index: usize) -> &str {
        &self.0[index]
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.0.binary_search_by(|l| l.as_str().cmp(label)).ok()
    }

    /// Class index per label; every label must belong to the set.
    pub fn encode<L: AsRef<str>>(&self, labels: &[L]) -> Result<Vec<usize>, ClassifierError> {
        labels
            .iter()
            .map(|l| {
                self.index_of(l.as_ref()).ok_or_else(|| {
                    ClassifierError::InsufficientData(format!("unknown label '{}'", l.as_ref()))
                })
            })
            .collect()
    }

    /// Samples per class, indexed like the set.
    pub fn counts(&self, encoded: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.len()];
        for &c in encoded {
            counts[c] += 1;
        }
        counts
    }
}

// ═══════════════════════════════════════════════════════════
// Classifier interface
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    RandomForest,
    #[default]
    CalibratedSvm,
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RandomForest => write!(f, "random_forest"),
            Self::CalibratedSvm => write!(f, "calibrated_svm"),
        }
    }
}

pub trait ProbabilisticClassifier {
    fn fit<L: AsRef<str>>(&mut self, x: &FeatureMatrix, labels: &[L]) -> Result<(), ClassifierError>;

    /// One row per sample, columns indexed by `labels()`.
    fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ClassifierError>;

    fn labels(&self) -> Option<&LabelSet>;

    fn n_features(&self) -> Option<usize>;

    /// Label of the highest probability; first maximal index on ties.
    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<String>, ClassifierError> {
        let labels = self.labels().ok_or(ClassifierError::NotFit)?;
        Ok(self
            .predict_proba(x)?
            .iter()
            .map(|row| labels.label(argmax(row)).to_string())
            .collect())
    }
}

/// Serializable dispatch over the two classifier families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    RandomForest(RandomForest),
    CalibratedSvm(CalibratedLinearSvm),
}

impl Classifier {
    pub fn from_config(config: &ClassifierConfig, seed: u64) -> Self {
        match config.kind {
            ClassifierKind::RandomForest => {
                Self::RandomForest(RandomForest::new(config.forest.clone(), seed))
            }
            ClassifierKind::CalibratedSvm => {
                Self::CalibratedSvm(CalibratedLinearSvm::new(config.svm.clone(), seed))
            }
        }
    }

    pub fn kind(&self) -> ClassifierKind {
        match self {
            Self::RandomForest(_) => ClassifierKind::RandomForest,
            Self::CalibratedSvm(_) => ClassifierKind::CalibratedSvm,
        }
    }

    /// Out-of-bag accuracy, forests only.
    pub fn oob_score(&self) -> Option<f64> {
        match self {
            Self::RandomForest(forest) => forest.oob_score(),
            Self::CalibratedSvm(_) => None,
        }
    }
}

impl ProbabilisticClassifier for Classifier {
    fn fit<L: AsRef<str>>(&mut self, x: &FeatureMatrix, labels: &[L]) -> Result<(), ClassifierError> {
        match self {
            Self::RandomForest(model) => model.fit(x, labels),
            Self::CalibratedSvm(model) => model.fit(x, labels),
        }
    }

    fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ClassifierError> {
        match self {
            Self::RandomForest(model) => model.predict_proba(x),
            Self::CalibratedSvm(model) => model.predict_proba(x),
        }
    }

    fn labels(&self) -> Option<&LabelSet> {
        match self {
            Self::RandomForest(model) => model.labels(),
            Self::CalibratedSvm(model) => model.labels(),
        }
    }

    fn n_features(&self) -> Option<usize> {
        match self {
            Self::RandomForest(model) => model.n_features(),
            Self::CalibratedSvm(model) => model.n_features(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════

/// First index of the maximum value.
pub fn argmax(row: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Fold id per sample so each fold holds a share of every class.
/// Without a seed, the j-th sample of each class goes to fold `j % k`;
/// with a seed, samples are shuffled within their class first.
pub fn stratified_folds(classes: &[usize], k: usize, seed: Option<u64>) -> Vec<usize> {
    let n_classes = classes.iter().copied().max().map_or(0, |m| m + 1);
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (i, &c) in classes.iter().enumerate() {
        members[c].push(i);
    }
    if let Some(seed) = seed {
        let mut rng = StdRng::seed_from_u64(seed);
        for group in &mut members {
            group.shuffle(&mut rng);
        }
    }

    let mut folds = vec![0; classes.len()];
    // Continue the rotation across classes so fold sizes stay balanced.
    let mut next = 0;
    for group in &members {
        for &i in group {
            folds[i] = next % k;
            next += 1;
        }
    }
    folds
}

pub(crate) fn check_labels(x: &FeatureMatrix, n_labels: usize) -> Result<(), ClassifierError> {
    if x.n_rows() != n_labels {
        return Err(ClassifierError::LabelCountMismatch {
            rows: x.n_rows(),
            labels: n_labels,
        });
    }
    if x.is_empty() {
        return Err(ClassifierError::InsufficientData("no training rows".into()));
    }
    Ok(())
}

pub(crate) fn check_width(x: &FeatureMatrix, expected: usize) -> Result<(), ClassifierError> {
    if x.n_cols() != expected {
        return Err(ClassifierError::DimensionMismatch {
            expected,
            actual: x.n_cols(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::pipeline::features::FeatureMatrix;

    /// Two well separated classes over four columns.
    pub fn separable(per_class: usize) -> (FeatureMatrix, Vec<String>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..per_class {
            let jitter = (i % 5) as f64 * 0.02;
            rows.push(vec![0.9 - jitter, 0.1 + jitter, 0.0, 0.05]);
            labels.push("contract".to_string());
            rows.push(vec![0.05, 0.0, 0.85 + jitter, 0.2 - jitter]);
            labels.push("petition".to_string());
        }
        (FeatureMatrix::from_dense(&rows), labels)
    }

    /// Three classes, one dominant column each.
    pub fn three_class(per_class: usize) -> (FeatureMatrix, Vec<String>) {
        let names = ["affidavit", "ruling", "contract"];
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..per_class {
            for (c, name) in names.iter().enumerate() {
                let mut row = vec![0.05; 3];
                row[c] = 0.8 + (i % 3) as f64 * 0.05;
                rows.push(row);
                labels.push(name.to_string());
            }
        }
        (FeatureMatrix::from_dense(&rows), labels)
    }
}
