use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{argmax, check_labels, check_width, ClassifierError, LabelSet, ProbabilisticClassifier};
use crate::pipeline::features::FeatureMatrix;

/// Candidate features examined per split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        let m = match self {
            Self::Sqrt => (n_features as f64).sqrt() as usize,
            Self::Log2 => (n_features as f64).log2() as usize,
            Self::All => n_features,
        };
        m.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub max_features: MaxFeatures,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 150,
            max_depth: 20,
            max_features: MaxFeatures::Sqrt,
            min_samples_split: 8,
            min_samples_leaf: 3,
            bootstrap: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Leaf {
        class: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// CART tree with Gini impurity; leaves hold the majority class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn predict_row(&self, row: &[(usize, f64)]) -> usize {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { class } => return *class,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row
                        .binary_search_by_key(feature, |(j, _)| *j)
                        .map(|pos| row[pos].1)
                        .unwrap_or(0.0);
                    index = if value <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [usize],
    n_classes: usize,
    params: &'a ForestParams,
    max_features: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl TreeBuilder<'_> {
    fn build(mut self, samples: Vec<usize>) -> DecisionTree {
        self.grow(samples, 0);
        DecisionTree { nodes: self.nodes }
    }

    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&samples);
        let majority = argmax_count(&counts);
        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;

        let index = self.nodes.len();
        self.nodes.push(Node::Leaf { class: majority });

        if pure
            || depth >= self.params.max_depth
            || samples.len() < self.params.min_samples_split
            || samples.len() < 2 * self.params.min_samples_leaf
        {
            return index;
        }

        let Some(split) = self.best_split(&samples, gini(&counts, samples.len())) else {
            return index;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.x[i][split.feature] <= split.threshold);

        let left = self.grow(left, depth + 1);
        let right = self.grow(right, depth + 1);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        index
    }

    /// Visit features in random order until `max_features` non-constant ones
    /// have been examined; keep the lowest weighted child impurity.
    fn best_split(&mut self, samples: &[usize], parent_impurity: f64) -> Option<BestSplit> {
        let n_features = self.x.first().map_or(0, Vec::len);
        let mut features: Vec<usize> = (0..n_features).collect();
        features.shuffle(&mut self.rng);

        let mut best: Option<BestSplit> = None;
        let mut examined = 0;
        let mut values: Vec<(f64, usize)> = Vec::with_capacity(samples.len());

        for feature in features {
            if examined >= self.max_features {
                break;
            }
            values.clear();
            values.extend(samples.iter().map(|&i| (self.x[i][feature], self.y[i])));
            values.sort_by(|a, b| a.0.total_cmp(&b.0));
            if values[0].0 == values[values.len() - 1].0 {
                continue;
            }
            examined += 1;

            if let Some(candidate) = self.scan_feature(feature, &values) {
                if best.as_ref().map_or(true, |b| candidate.impurity < b.impurity) {
                    best = Some(candidate);
                }
            }
        }

        best.filter(|b| b.impurity < parent_impurity - 1e-12)
    }

    fn scan_feature(&self, feature: usize, values: &[(f64, usize)]) -> Option<BestSplit> {
        let n = values.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut left = vec![0usize; self.n_classes];
        let mut right = vec![0usize; self.n_classes];
        for &(_, c) in values {
            right[c] += 1;
        }

        let mut best: Option<BestSplit> = None;
        for i in 0..n - 1 {
            let c = values[i].1;
            left[c] += 1;
            right[c] -= 1;

            let n_left = i + 1;
            let n_right = n - n_left;
            if values[i].0 == values[i + 1].0 || n_left < min_leaf || n_right < min_leaf {
                continue;
            }

            let impurity = (n_left as f64 * gini(&left, n_left)
                + n_right as f64 * gini(&right, n_right))
                / n as f64;
            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                best = Some(BestSplit {
                    feature,
                    threshold: (values[i].0 + values[i + 1].0) / 2.0,
                    impurity,
                });
            }
        }
        best
    }

    fn class_counts(&self, samples: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &i in samples {
            counts[self.y[i]] += 1;
        }
        counts
    }
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

fn argmax_count(counts: &[usize]) -> usize {
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedForest {
    labels: LabelSet,
    n_features: usize,
    trees: Vec<DecisionTree>,
    oob_score: Option<f64>,
}

/// Bagged CART ensemble. Probability = fraction of trees voting each class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    seed: u64,
    fitted: Option<FittedForest>,
}

impl RandomForest {
    pub fn new(params: ForestParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            fitted: None,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Accuracy on samples left out of each tree's bootstrap draw.
    pub fn oob_score(&self) -> Option<f64> {
        self.fitted.as_ref().and_then(|f| f.oob_score)
    }
}

impl ProbabilisticClassifier for RandomForest {
    fn fit<L: AsRef<str>>(&mut self, x: &FeatureMatrix, labels: &[L]) -> Result<(), ClassifierError> {
        check_labels(x, labels.len())?;
        if self.params.n_estimators == 0 {
            return Err(ClassifierError::InsufficientData("n_estimators is zero".into()));
        }

        let label_set = LabelSet::from_labels(labels);
        let y = label_set.encode(labels)?;
        let dense = x.to_dense();
        let n = dense.len();
        let max_features = self.params.max_features.resolve(x.n_cols());

        let fitted: Vec<(DecisionTree, Vec<bool>)> = (0..self.params.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(t as u64));
                let mut in_bag = vec![!self.params.bootstrap; n];
                let samples: Vec<usize> = if self.params.bootstrap {
                    (0..n)
                        .map(|_| {
                            let i = rng.gen_range(0..n);
                            in_bag[i] = true;
                            i
                        })
                        .collect()
                } else {
                    (0..n).collect()
                };

                let tree = TreeBuilder {
                    x: &dense,
                    y: &y,
                    n_classes: label_set.len(),
                    params: &self.params,
                    max_features,
                    rng,
                    nodes: Vec::new(),
                }
                .build(samples);
                (tree, in_bag)
            })
            .collect();

        let oob_score = if self.params.bootstrap {
            oob_accuracy(&fitted, &dense, &y, label_set.len())
        } else {
            None
        };

        tracing::info!(
            trees = fitted.len(),
            samples = n,
            features = x.n_cols(),
            classes = label_set.len(),
            oob_score = ?oob_score,
            "Random forest fit"
        );

        self.fitted = Some(FittedForest {
            labels: label_set,
            n_features: x.n_cols(),
            trees: fitted.into_iter().map(|(tree, _)| tree).collect(),
            oob_score,
        });
        Ok(())
    }

    fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ClassifierError> {
        let fitted = self.fitted.as_ref().ok_or(ClassifierError::NotFit)?;
        check_width(x, fitted.n_features)?;

        let n_trees = fitted.trees.len() as f64;
        Ok(x.rows()
            .map(|row| {
                let mut votes = vec![0.0; fitted.labels.len()];
                for tree in &fitted.trees {
                    votes[tree.predict_row(row)] += 1.0;
                }
                votes.iter().map(|v| v / n_trees).collect()
            })
            .collect())
    }

    fn labels(&self) -> Option<&LabelSet> {
        self.fitted.as_ref().map(|f| &f.labels)
    }

    fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_features)
    }
}

fn oob_accuracy(
    fitted: &[(DecisionTree, Vec<bool>)],
    dense: &[Vec<f64>],
    y: &[usize],
    n_classes: usize,
) -> Option<f64> {
    let mut scored = 0usize;
    let mut correct = 0usize;
    for (i, row) in dense.iter().enumerate() {
        let sparse: Vec<(usize, f64)> = row
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(j, v)| (j, *v))
            .collect();
        let mut votes = vec![0.0; n_classes];
        let mut any = false;
        for (tree, in_bag) in fitted {
            if !in_bag[i] {
                votes[tree.predict_row(&sparse)] += 1.0;
                any = true;
            }
        }
        if any {
            scored += 1;
            if argmax(&votes) == y[i] {
                correct += 1;
            }
        }
    }
    (scored > 0).then(|| correct as f64 / scored as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::test_support::{separable, three_class};

    fn small_params() -> ForestParams {
        ForestParams {
            n_estimators: 25,
            min_samples_split: 2,
            min_samples_leaf: 1,
            ..ForestParams::default()
        }
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(3000), 54);
        assert_eq!(MaxFeatures::Log2.resolve(1024), 10);
        assert_eq!(MaxFeatures::All.resolve(7), 7);
        assert_eq!(MaxFeatures::Sqrt.resolve(1), 1);
    }

    #[test]
    fn gini_of_pure_and_even_nodes() {
        assert_eq!(gini(&[4, 0], 4), 0.0);
        assert!((gini(&[2, 2], 4) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn separates_two_classes() {
        let (x, y) = separable(20);
        let mut forest = RandomForest::new(small_params(), 42);
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.predict(&x).unwrap(), y);
        assert!(forest.oob_score().unwrap() > 0.9);
    }

    #[test]
    fn probabilities_are_vote_fractions() {
        let (x, y) = three_class(10);
        let mut forest = RandomForest::new(small_params(), 7);
        forest.fit(&x, &y).unwrap();
        for row in forest.predict_proba(&x).unwrap() {
            assert_eq!(row.len(), 3);
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            for p in row {
                // Each entry is k / 25 for some integer k.
                assert!(((p * 25.0) - (p * 25.0).round()).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = three_class(8);
        let mut a = RandomForest::new(small_params(), 42);
        let mut b = RandomForest::new(small_params(), 42);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn respects_depth_limit() {
        let (x, y) = three_class(10);
        let mut stump = RandomForest::new(
            ForestParams {
                max_depth: 0,
                ..small_params()
            },
            1,
        );
        stump.fit(&x, &y).unwrap();
        let fitted = stump.fitted.as_ref().unwrap();
        assert!(fitted.trees.iter().all(|t| t.nodes.len() == 1));
    }

    #[test]
    fn wrong_width_is_dimension_mismatch() {
        let (x, y) = separable(5);
        let mut forest = RandomForest::new(small_params(), 0);
        forest.fit(&x, &y).unwrap();
        let narrow = FeatureMatrix::from_dense(&[vec![1.0, 0.0]]);
        assert_eq!(
            forest.predict_proba(&narrow).unwrap_err(),
            ClassifierError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn serde_round_trip_predicts_identically() {
        let (x, y) = separable(6);
        let mut forest = RandomForest::new(small_params(), 3);
        forest.fit(&x, &y).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let back: RandomForest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.predict(&x).unwrap(), forest.predict(&x).unwrap());
    }
}
