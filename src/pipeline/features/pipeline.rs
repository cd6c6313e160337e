use serde::{Deserialize, Serialize};

use super::{Chi2Selector, FeatureError, FeatureMatrix, TfidfVectorizer, VectorizerParams};
use crate::pipeline_config::FeaturesConfig;

/// Vectorizer followed by selector, fit together and frozen together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePipeline {
    pub vectorizer: TfidfVectorizer,
    pub selector: Chi2Selector,
}

impl FeaturePipeline {
    pub fn new(params: VectorizerParams, k_best: usize) -> Self {
        Self {
            vectorizer: TfidfVectorizer::new(params),
            selector: Chi2Selector::new(k_best),
        }
    }

    pub fn from_config(config: &FeaturesConfig) -> Self {
        Self::new(config.vectorizer.clone(), config.k_best)
    }

    /// Reassemble from separately stored stages.
    pub fn from_parts(vectorizer: TfidfVectorizer, selector: Chi2Selector) -> Self {
        Self {
            vectorizer,
            selector,
        }
    }

    pub fn is_fit(&self) -> bool {
        self.vectorizer.is_fit() && self.selector.is_fit()
    }

    /// Columns of every transformed matrix, once fit.
    pub fn output_width(&self) -> Option<usize> {
        self.selector.output_width()
    }

    /// Fit both stages on training texts and return the training matrix.
    pub fn fit<S: AsRef<str>, L: AsRef<str>>(
        &mut self,
        texts: &[S],
        labels: &[L],
    ) -> Result<FeatureMatrix, FeatureError> {
        if texts.len() != labels.len() {
            return Err(FeatureError::LabelCountMismatch {
                rows: texts.len(),
                labels: labels.len(),
            });
        }
        let weighted = self.vectorizer.fit_transform(texts)?;
        self.selector.fit_transform(&weighted, labels)
    }

    pub fn transform<S: AsRef<str>>(&self, texts: &[S]) -> Result<FeatureMatrix, FeatureError> {
        if !self.selector.is_fit() {
            return Err(FeatureError::NotFit { stage: "selector" });
        }
        let weighted = self.vectorizer.transform(texts)?;
        self.selector.transform(&weighted)
    }
}
