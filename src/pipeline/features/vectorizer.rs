use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{FeatureError, FeatureMatrix};

/// Words of two or more word characters.
static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w\w+\b").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizerParams {
    /// Terms present in more than this fraction of documents are dropped.
    pub max_df: f64,
    /// Terms present in fewer documents than this are dropped.
    pub min_df: usize,
    /// Keep at most this many terms, by corpus frequency.
    pub max_features: usize,
    /// Use `1 + ln(tf)` instead of raw counts.
    pub sublinear_tf: bool,
    /// Longest n-gram (1 = unigrams, 2 = unigrams + bigrams).
    pub ngram_max: usize,
}

impl Default for VectorizerParams {
    fn default() -> Self {
        Self {
            max_df: 0.6,
            min_df: 5,
            max_features: 10_000,
            sublinear_tf: true,
            ngram_max: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedVocabulary {
    /// Term → column, columns assigned in lexicographic term order.
    terms: BTreeMap<String, usize>,
    idf: Vec<f64>,
    documents: usize,
}

/// TF-IDF vectorizer over unigrams and bigrams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    params: VectorizerParams,
    fitted: Option<FittedVocabulary>,
}

impl TfidfVectorizer {
    pub fn new(params: VectorizerParams) -> Self {
        Self {
            params,
            fitted: None,
        }
    }

    pub fn params(&self) -> &VectorizerParams {
        &self.params
    }

    pub fn is_fit(&self) -> bool {
        self.fitted.is_some()
    }

    /// Number of columns produced by `transform`, once fit.
    pub fn vocabulary_len(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.terms.len())
    }

    /// Terms in column order.
    pub fn terms(&self) -> Vec<&str> {
        self.fitted
            .as_ref()
            .map(|f| f.terms.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Unigrams, then bigrams of adjacent tokens.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let tokens: Vec<&str> = TOKEN.find_iter(text).map(|m| m.as_str()).collect();
        let mut grams: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        if self.params.ngram_max >= 2 {
            grams.extend(tokens.windows(2).map(|w| format!("{} {}", w[0], w[1])));
        }
        grams
    }

    pub fn fit<S: AsRef<str>>(&mut self, texts: &[S]) -> Result<(), FeatureError> {
        let n_docs = texts.len();
        if n_docs == 0 {
            return Err(FeatureError::EmptyCorpus);
        }

        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        let mut corpus_frequency: HashMap<String, usize> = HashMap::new();
        for text in texts {
            let counts = count_terms(self.analyze(text.as_ref()));
            for (term, count) in counts {
                *corpus_frequency.entry(term.clone()).or_default() += count;
                *document_frequency.entry(term).or_default() += 1;
            }
        }

        let max_doc_count = self.params.max_df * n_docs as f64;
        let mut candidates: Vec<(String, usize)> = document_frequency
            .iter()
            .filter(|(_, &df)| df as f64 <= max_doc_count && df >= self.params.min_df)
            .map(|(term, _)| (term.clone(), corpus_frequency[term]))
            .collect();

        if candidates.is_empty() {
            return Err(FeatureError::EmptyVocabulary { documents: n_docs });
        }

        // Most frequent first, ties by term, then keep the head.
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(self.params.max_features);

        let mut kept: Vec<String> = candidates.into_iter().map(|(term, _)| term).collect();
        kept.sort();

        let idf: Vec<f64> = kept
            .iter()
            .map(|term| {
                let df = document_frequency[term] as f64;
                ((1.0 + n_docs as f64) / (1.0 + df)).ln() + 1.0
            })
            .collect();
        let terms: BTreeMap<String, usize> =
            kept.into_iter().enumerate().map(|(i, t)| (t, i)).collect();

        tracing::info!(
            documents = n_docs,
            candidate_terms = document_frequency.len(),
            vocabulary = terms.len(),
            "Vectorizer fit"
        );

        self.fitted = Some(FittedVocabulary {
            terms,
            idf,
            documents: n_docs,
        });
        Ok(())
    }

    /// Weighted, L2-normalized rows over the frozen vocabulary.
    pub fn transform<S: AsRef<str>>(&self, texts: &[S]) -> Result<FeatureMatrix, FeatureError> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or(FeatureError::NotFit { stage: "vectorizer" })?;

        let mut matrix = FeatureMatrix::new(fitted.terms.len());
        for text in texts {
            let counts = count_terms(self.analyze(text.as_ref()));
            let mut row: Vec<(usize, f64)> = counts
                .into_iter()
                .filter_map(|(term, count)| {
                    fitted.terms.get(&term).map(|&col| {
                        let tf = if self.params.sublinear_tf {
                            1.0 + (count as f64).ln()
                        } else {
                            count as f64
                        };
                        (col, tf * fitted.idf[col])
                    })
                })
                .collect();

            let norm = row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for (_, v) in &mut row {
                    *v /= norm;
                }
            }
            matrix.push_row(row);
        }
        Ok(matrix)
    }

    pub fn fit_transform<S: AsRef<str>>(&mut self, texts: &[S]) -> Result<FeatureMatrix, FeatureError> {
        self.fit(texts)?;
        self.transform(texts)
    }
}

fn count_terms(grams: Vec<String>) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for gram in grams {
        *counts.entry(gram).or_default() += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min_df: usize, max_df: f64) -> VectorizerParams {
        VectorizerParams {
            max_df,
            min_df,
            ..VectorizerParams::default()
        }
    }

    #[test]
    fn analyze_builds_unigrams_and_bigrams() {
        let v = TfidfVectorizer::new(VectorizerParams::default());
        assert_eq!(
            v.analyze("court a order issued"),
            vec!["court", "order", "issued", "court order", "order issued"]
        );
    }

    #[test]
    fn unigram_only_when_ngram_max_is_one() {
        let v = TfidfVectorizer::new(VectorizerParams {
            ngram_max: 1,
            ..VectorizerParams::default()
        });
        assert_eq!(v.analyze("motion to dismiss"), vec!["motion", "to", "dismiss"]);
    }

    #[test]
    fn transform_before_fit_is_error() {
        let v = TfidfVectorizer::new(VectorizerParams::default());
        assert_eq!(
            v.transform(&["anything"]).unwrap_err(),
            FeatureError::NotFit { stage: "vectorizer" }
        );
    }

    #[test]
    fn document_frequency_bounds_prune_terms() {
        let docs = ["alpha beta", "alpha gamma", "alpha beta", "delta"];
        let mut v = TfidfVectorizer::new(VectorizerParams {
            ngram_max: 1,
            ..params(2, 0.6)
        });
        v.fit(&docs).unwrap();
        // alpha is in 3/4 docs (> 0.6), gamma/delta in 1 (< 2).
        assert_eq!(v.terms(), vec!["beta"]);
    }

    #[test]
    fn columns_are_lexicographic_and_capped() {
        let docs = ["zeta zeta zeta alpha", "zeta mid", "alpha mid mid"];
        let mut v = TfidfVectorizer::new(VectorizerParams {
            ngram_max: 1,
            max_features: 2,
            ..params(1, 1.0)
        });
        v.fit(&docs).unwrap();
        // Frequencies: zeta 4, mid 3, alpha 2 → keep zeta, mid; columns sorted.
        assert_eq!(v.terms(), vec!["mid", "zeta"]);
    }

    #[test]
    fn rows_are_l2_normalized() {
        let docs = ["petition filed today", "ruling delivered today", "petition ruling"];
        let mut v = TfidfVectorizer::new(params(1, 1.0));
        let m = v.fit_transform(&docs).unwrap();
        for row in m.rows() {
            let norm: f64 = row.iter().map(|(_, x)| x * x).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn smoothed_idf_and_sublinear_tf() {
        let docs = ["aa aa bb", "bb"];
        let mut v = TfidfVectorizer::new(VectorizerParams {
            ngram_max: 1,
            ..params(1, 1.0)
        });
        let m = v.fit_transform(&docs).unwrap();
        // aa: df 1 → idf ln(3/2)+1, tf 2 → 1+ln2. bb: df 2 → idf 1, tf 1.
        let aa = (1.0 + 2f64.ln()) * ((3.0f64 / 2.0).ln() + 1.0);
        let bb = 1.0;
        let norm = (aa * aa + bb * bb).sqrt();
        assert!((m.get(0, 0) - aa / norm).abs() < 1e-12);
        assert!((m.get(0, 1) - bb / norm).abs() < 1e-12);
        assert!((m.get(1, 1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unseen_text_yields_empty_row_of_fixed_width() {
        let docs = ["contract signed", "contract breached"];
        let mut v = TfidfVectorizer::new(params(1, 1.0));
        v.fit(&docs).unwrap();
        let m = v.transform(&["completely unrelated words"]).unwrap();
        assert_eq!(m.n_rows(), 1);
        assert_eq!(m.n_cols(), v.vocabulary_len().unwrap());
        assert!(m.row(0).is_empty());
    }

    #[test]
    fn everything_pruned_is_empty_vocabulary() {
        let mut v = TfidfVectorizer::new(params(5, 0.6));
        let err = v.fit(&["one doc", "two doc"]).unwrap_err();
        assert_eq!(err, FeatureError::EmptyVocabulary { documents: 2 });
    }

    #[test]
    fn empty_corpus_is_rejected() {
        let mut v = TfidfVectorizer::new(VectorizerParams::default());
        let empty: [&str; 0] = [];
        assert_eq!(v.fit(&empty).unwrap_err(), FeatureError::EmptyCorpus);
    }

    #[test]
    fn serde_round_trip_preserves_transform() {
        let docs = ["affidavit sworn", "affidavit filed", "order filed"];
        let mut v = TfidfVectorizer::new(params(1, 1.0));
        v.fit(&docs).unwrap();
        let json = serde_json::to_string(&v).unwrap();
        let back: TfidfVectorizer = serde_json::from_str(&json).unwrap();
        assert_eq!(back.terms(), v.terms());
        let (a, b) = (back.transform(&docs).unwrap(), v.transform(&docs).unwrap());
        for (ra, rb) in a.to_dense().iter().zip(b.to_dense()) {
            for (x, y) in ra.iter().zip(rb) {
                assert!((x - y).abs() < 1e-12);
            }
        }
    }
}
