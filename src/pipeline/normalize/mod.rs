//! Text normalization ahead of feature extraction.
//!
//! Both strategies share one canonical form (lowercase, restricted alphabet,
//! single spaces). The strategy is resolved once when the normalizer is built;
//! a runtime failure of the linguistic strategy falls back to the simple one.

pub mod degrade;
pub mod strategy;

pub use degrade::*;
pub use strategy::*;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::pipeline::ingestion::Corpus;
use crate::pipeline_config::NormalizeConfig;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Input too large for the linguistic tokenizer ({chars} chars, limit {limit})")]
    InputTooLarge { chars: usize, limit: usize },

    #[error("Linguistic resource unavailable at {path}: {source}")]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed linguistic resource {path} line {line}")]
    MalformedResource { path: PathBuf, line: usize },
}

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
/// Anything but letters (any script, with their combining marks), digits,
/// whitespace, and `-/.,`.
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{M}\p{Nd}\s\-/.,]").unwrap());
static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{3}\s*Page Break\s*-{3}").unwrap());

/// Canonical form shared by every strategy.
pub fn canonicalize(text: &str) -> String {
    let text = PAGE_MARKER.replace_all(text, " ");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = text.trim().to_lowercase();
    let text = DISALLOWED.replace_all(&text, " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

pub struct TextNormalizer {
    primary: Box<dyn NormalizeStrategy>,
    fallback: SimpleStrategy,
}

impl TextNormalizer {
    /// Simple strategy only.
    pub fn simple() -> Self {
        Self::with_strategy(Box::new(SimpleStrategy))
    }

    pub fn with_strategy(primary: Box<dyn NormalizeStrategy>) -> Self {
        Self {
            primary,
            fallback: SimpleStrategy,
        }
    }

    /// Linguistic strategy when its resources load from `resource_dir`,
    /// otherwise the simple strategy.
    pub fn from_config(config: &NormalizeConfig, resource_dir: &Path) -> Self {
        match LinguisticStrategy::load(resource_dir, config.max_tokenizer_chars) {
            Ok(strategy) => {
                tracing::info!(
                    resource_dir = %resource_dir.display(),
                    stopwords = strategy.stopword_count(),
                    lemmas = strategy.lemma_count(),
                    "Linguistic normalizer ready"
                );
                Self::with_strategy(Box::new(strategy))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Linguistic resources unavailable, using simple normalizer"
                );
                Self::simple()
            }
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.primary.name()
    }

    /// Normalize one text. Deterministic for a given normalizer.
    pub fn normalize(&self, text: &str) -> String {
        let canonical = canonicalize(text);
        match self.primary.normalize(&canonical) {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::warn!(
                    strategy = self.primary.name(),
                    error = %e,
                    "Normalization failed, retrying with simple strategy"
                );
                self.fallback.tokens(&canonical).join(" ")
            }
        }
    }

    /// Fill `normalized` on every document of the corpus.
    pub fn normalize_corpus(&self, corpus: &mut Corpus) {
        for doc in &mut corpus.documents {
            doc.normalized = Some(self.normalize(&doc.text));
        }
        tracing::debug!(
            documents = corpus.documents.len(),
            strategy = self.strategy_name(),
            "Corpus normalized"
        );
    }
}

impl std::fmt::Debug for TextNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextNormalizer")
            .field("strategy", &self.primary.name())
            .finish()
    }
}
