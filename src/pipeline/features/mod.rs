//! Feature extraction: weighted n-gram vectorization + chi-squared selection.
//!
//! Both stages are fit on training text only and frozen afterwards, so every
//! later transform yields the same width and column order.

pub mod matrix;
pub mod pipeline;
pub mod selector;
pub mod vectorizer;

pub use matrix::*;
pub use pipeline::*;
pub use selector::*;
pub use vectorizer::*;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("{stage} used before fit")]
    NotFit { stage: &'static str },

    #[error("Feature width mismatch: expected {expected} columns, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vocabulary is empty after document-frequency pruning ({documents} documents)")]
    EmptyVocabulary { documents: usize },

    #[error("Cannot fit on an empty corpus")]
    EmptyCorpus,

    #[error("{rows} rows but {labels} labels")]
    LabelCountMismatch { rows: usize, labels: usize },
}
