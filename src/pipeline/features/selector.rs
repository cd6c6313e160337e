use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{FeatureError, FeatureMatrix};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Selection {
    input_width: usize,
    /// Selected input columns, ascending.
    selected: Vec<usize>,
}

/// Keeps the `k` columns with the highest chi-squared statistic against the labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chi2Selector {
    k: usize,
    selection: Option<Selection>,
}

impl Chi2Selector {
    pub fn new(k: usize) -> Self {
        Self { k, selection: None }
    }

    pub fn is_fit(&self) -> bool {
        self.selection.is_some()
    }

    /// Width this selector was fit on.
    pub fn input_width(&self) -> Option<usize> {
        self.selection.as_ref().map(|s| s.input_width)
    }

    /// Number of output columns, once fit (k clamped to the input width).
    pub fn output_width(&self) -> Option<usize> {
        self.selection.as_ref().map(|s| s.selected.len())
    }

    pub fn selected(&self) -> &[usize] {
        self.selection
            .as_ref()
            .map(|s| s.selected.as_slice())
            .unwrap_or(&[])
    }

    pub fn fit<L: AsRef<str>>(&mut self, x: &FeatureMatrix, labels: &[L]) -> Result<(), FeatureError> {
        if x.n_rows() != labels.len() {
            return Err(FeatureError::LabelCountMismatch {
                rows: x.n_rows(),
                labels: labels.len(),
            });
        }
        if x.is_empty() {
            return Err(FeatureError::EmptyCorpus);
        }

        let scores = chi2_scores(x, labels);
        let k = self.k.min(x.n_cols());

        let mut order: Vec<usize> = (0..x.n_cols()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        let mut selected: Vec<usize> = order.into_iter().take(k).collect();
        selected.sort_unstable();

        tracing::info!(
            input_width = x.n_cols(),
            requested_k = self.k,
            selected = selected.len(),
            "Chi-squared selector fit"
        );

        self.selection = Some(Selection {
            input_width: x.n_cols(),
            selected,
        });
        Ok(())
    }

    pub fn transform(&self, x: &FeatureMatrix) -> Result<FeatureMatrix, FeatureError> {
        let selection = self
            .selection
            .as_ref()
            .ok_or(FeatureError::NotFit { stage: "selector" })?;
        if x.n_cols() != selection.input_width {
            return Err(FeatureError::DimensionMismatch {
                expected: selection.input_width,
                actual: x.n_cols(),
            });
        }

        let mut remap = vec![None; selection.input_width];
        for (new, &old) in selection.selected.iter().enumerate() {
            remap[old] = Some(new);
        }

        let mut out = FeatureMatrix::new(selection.selected.len());
        for row in x.rows() {
            out.push_row(
                row.iter()
                    .filter_map(|&(j, v)| remap[j].map(|new| (new, v)))
                    .collect(),
            );
        }
        Ok(out)
    }

    pub fn fit_transform<L: AsRef<str>>(
        &mut self,
        x: &FeatureMatrix,
        labels: &[L],
    ) -> Result<FeatureMatrix, FeatureError> {
        self.fit(x, labels)?;
        self.transform(x)
    }
}

/// Chi-squared statistic per column. Observed = per-class column sums,
/// expected = class prior × column total. Undefined scores count as zero.
pub fn chi2_scores<L: AsRef<str>>(x: &FeatureMatrix, labels: &[L]) -> Vec<f64> {
    let mut class_index: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        let next = class_index.len();
        class_index.entry(label.as_ref()).or_insert(next);
    }
    let n_classes = class_index.len();
    let n_rows = x.n_rows() as f64;

    let mut observed = vec![vec![0.0; x.n_cols()]; n_classes];
    let mut class_count = vec![0.0; n_classes];
    for (row, label) in x.rows().zip(labels) {
        let c = class_index[label.as_ref()];
        class_count[c] += 1.0;
        for &(j, v) in row {
            observed[c][j] += v;
        }
    }

    (0..x.n_cols())
        .map(|j| {
            let total: f64 = observed.iter().map(|o| o[j]).sum();
            let score: f64 = (0..n_classes)
                .map(|c| {
                    let expected = class_count[c] / n_rows * total;
                    let diff = observed[c][j] - expected;
                    diff * diff / expected
                })
                .sum();
            if score.is_finite() {
                score
            } else {
                0.0
            }
        })
        .collect()
}
