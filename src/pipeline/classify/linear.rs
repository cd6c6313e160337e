use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{
    check_labels, check_width, stratified_folds, ClassifierError, LabelSet, PlattScaler,
    ProbabilisticClassifier,
};
use crate::pipeline::features::{dot, FeatureMatrix};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmParams {
    /// Inverse regularization strength.
    pub c: f64,
    /// Passes over the training set per binary problem.
    pub max_iter: usize,
    /// Stop once the projected-gradient spread falls below this.
    pub tol: f64,
    /// Folds used to fit the probability calibrators.
    pub calibration_folds: usize,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 20_000,
            tol: 1e-4,
            calibration_folds: 5,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Linear SVM (squared hinge, dual coordinate descent)
// ═══════════════════════════════════════════════════════════

/// One-vs-rest linear SVM. Weight vectors carry the bias as their last entry.
/// With two classes a single vector scores class 1 against class 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSvm {
    n_classes: usize,
    weights: Vec<Vec<f64>>,
}

impl LinearSvm {
    /// `classes` are indices into a label set of `n_classes` entries.
    pub fn train(
        x: &FeatureMatrix,
        classes: &[usize],
        n_classes: usize,
        params: &SvmParams,
        seed: u64,
    ) -> Self {
        let positives: Vec<usize> = if n_classes == 2 {
            vec![1]
        } else {
            (0..n_classes).collect()
        };

        let weights = positives
            .iter()
            .map(|&k| {
                let y: Vec<f64> = classes
                    .iter()
                    .map(|&c| if c == k { 1.0 } else { -1.0 })
                    .collect();
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(k as u64));
                solve_dual(x, &y, params, &mut rng)
            })
            .collect();

        Self { n_classes, weights }
    }

    /// Raw margins, one column per binary problem.
    pub fn decision_function(&self, x: &FeatureMatrix) -> Vec<Vec<f64>> {
        x.rows()
            .map(|row| self.weights.iter().map(|w| margin(row, w)).collect())
            .collect()
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }
}

fn margin(row: &[(usize, f64)], w: &[f64]) -> f64 {
    dot(row, w) + w[w.len() - 1]
}

/// Dual coordinate descent for the L2-regularized, L2-loss SVM with an
/// augmented constant feature for the bias.
fn solve_dual(x: &FeatureMatrix, y: &[f64], params: &SvmParams, rng: &mut StdRng) -> Vec<f64> {
    let n = x.n_rows();
    let bias = x.n_cols();
    let diag = 0.5 / params.c;

    let mut w = vec![0.0; bias + 1];
    let mut alpha = vec![0.0; n];
    let qd: Vec<f64> = x
        .rows()
        .map(|row| row.iter().map(|(_, v)| v * v).sum::<f64>() + 1.0 + diag)
        .collect();
    let mut order: Vec<usize> = (0..n).collect();

    let mut converged = false;
    let mut passes = 0;
    while passes < params.max_iter {
        passes += 1;
        order.shuffle(rng);
        let mut pg_max = f64::NEG_INFINITY;
        let mut pg_min = f64::INFINITY;

        for &i in &order {
            let row = x.row(i);
            let g = y[i] * margin(row, &w) - 1.0 + diag * alpha[i];
            let pg = if alpha[i] == 0.0 { g.min(0.0) } else { g };
            pg_max = pg_max.max(pg);
            pg_min = pg_min.min(pg);

            if pg.abs() > 1e-12 {
                let old = alpha[i];
                alpha[i] = (old - g / qd[i]).max(0.0);
                let delta = (alpha[i] - old) * y[i];
                for &(j, v) in row {
                    w[j] += delta * v;
                }
                w[bias] += delta;
            }
        }

        if pg_max - pg_min <= params.tol {
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::warn!(passes, tol = params.tol, "Linear SVM did not converge");
    }
    w
}

// ═══════════════════════════════════════════════════════════
// Calibrated ensemble
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CalibratedFold {
    svm: LinearSvm,
    /// One scaler per decision column.
    scalers: Vec<PlattScaler>,
}

impl CalibratedFold {
    fn probabilities(&self, decisions: &[f64], n_classes: usize) -> Vec<f64> {
        if n_classes == 2 {
            let p = self.scalers[0].predict(decisions[0]);
            return vec![1.0 - p, p];
        }
        let raw: Vec<f64> = self
            .scalers
            .iter()
            .zip(decisions)
            .map(|(s, &f)| s.predict(f))
            .collect();
        let sum: f64 = raw.iter().sum();
        if sum > 0.0 {
            raw.iter().map(|p| p / sum).collect()
        } else {
            vec![1.0 / n_classes as f64; n_classes]
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedSvm {
    labels: LabelSet,
    n_features: usize,
    folds: Vec<CalibratedFold>,
}

/// Linear SVM with sigmoid-calibrated probabilities.
///
/// Training data is split into stratified folds; each fold trains an SVM on
/// the rest and calibrates it on the held-out part. Predictions average the
/// calibrated probabilities of every fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedLinearSvm {
    params: SvmParams,
    seed: u64,
    fitted: Option<FittedSvm>,
}

impl CalibratedLinearSvm {
    pub fn new(params: SvmParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            fitted: None,
        }
    }

    pub fn params(&self) -> &SvmParams {
        &self.params
    }

    /// Calibration folds actually used, once fit.
    pub fn fold_count(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.folds.len())
    }
}

impl ProbabilisticClassifier for CalibratedLinearSvm {
    fn fit<L: AsRef<str>>(&mut self, x: &FeatureMatrix, labels: &[L]) -> Result<(), ClassifierError> {
        check_labels(x, labels.len())?;

        let label_set = LabelSet::from_labels(labels);
        if label_set.len() < 2 {
            return Err(ClassifierError::InsufficientData(
                "at least two classes are required".into(),
            ));
        }
        let y = label_set.encode(labels)?;
        let smallest = label_set.counts(&y).into_iter().min().unwrap_or(0);
        let k = self.params.calibration_folds.min(smallest);
        if k < 2 {
            return Err(ClassifierError::InsufficientData(format!(
                "smallest class has {smallest} samples, calibration needs at least 2"
            )));
        }

        let n_classes = label_set.len();
        let assignment = stratified_folds(&y, k, Some(self.seed));
        let folds: Vec<CalibratedFold> = (0..k)
            .into_par_iter()
            .map(|fold| {
                let (train, held): (Vec<usize>, Vec<usize>) =
                    (0..y.len()).partition(|&i| assignment[i] != fold);
                let train_y: Vec<usize> = train.iter().map(|&i| y[i]).collect();
                let svm = LinearSvm::train(
                    &x.select_rows(&train),
                    &train_y,
                    n_classes,
                    &self.params,
                    self.seed.wrapping_add(fold as u64),
                );

                let decisions = svm.decision_function(&x.select_rows(&held));
                let scalers = (0..svm.weights.len())
                    .map(|col| {
                        let positive_class = if n_classes == 2 { 1 } else { col };
                        let values: Vec<f64> = decisions.iter().map(|d| d[col]).collect();
                        let positive: Vec<bool> =
                            held.iter().map(|&i| y[i] == positive_class).collect();
                        PlattScaler::fit(&values, &positive)
                    })
                    .collect();
                CalibratedFold { svm, scalers }
            })
            .collect();

        tracing::info!(
            samples = y.len(),
            features = x.n_cols(),
            classes = n_classes,
            folds = k,
            "Calibrated linear SVM fit"
        );

        self.fitted = Some(FittedSvm {
            labels: label_set,
            n_features: x.n_cols(),
            folds,
        });
        Ok(())
    }

    fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ClassifierError> {
        let fitted = self.fitted.as_ref().ok_or(ClassifierError::NotFit)?;
        check_width(x, fitted.n_features)?;

        let n_classes = fitted.labels.len();
        let mut averaged = vec![vec![0.0; n_classes]; x.n_rows()];
        for fold in &fitted.folds {
            for (out, decisions) in averaged.iter_mut().zip(fold.svm.decision_function(x)) {
                for (acc, p) in out.iter_mut().zip(fold.probabilities(&decisions, n_classes)) {
                    *acc += p;
                }
            }
        }
        let folds = fitted.folds.len() as f64;
        for row in &mut averaged {
            for p in row.iter_mut() {
                *p /= folds;
            }
        }
        Ok(averaged)
    }

    fn labels(&self) -> Option<&LabelSet> {
        self.fitted.as_ref().map(|f| &f.labels)
    }

    fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_features)
    }
}
