use std::collections::{BTreeMap, BTreeSet};

use crate::pipeline_config::EvaluationConfig;

const SYNONYMS: &[(&str, &str)] = &[("power of attoney", "power of attorney")];

const PLURALS: &[(&str, &str)] = &[
    ("petitions", "petition"),
    ("contracts", "contract"),
    ("rulings", "ruling"),
    ("affidavits", "affidavit"),
];

/// Maps lexical label variants onto one vocabulary so ground truth and
/// model output compare equal when they mean the same class.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelNormalizer {
    synonyms: BTreeMap<String, String>,
    plurals: BTreeMap<String, String>,
    /// Labels the generic `-s` rule may singularize into.
    vocabulary: BTreeSet<String>,
}

impl Default for LabelNormalizer {
    fn default() -> Self {
        let synonyms: BTreeMap<String, String> = SYNONYMS
            .iter()
            .map(|(v, c)| (v.to_string(), c.to_string()))
            .collect();
        let plurals: BTreeMap<String, String> = PLURALS
            .iter()
            .map(|(p, s)| (p.to_string(), s.to_string()))
            .collect();
        let vocabulary = plurals
            .values()
            .chain(synonyms.values())
            .cloned()
            .collect();
        Self {
            synonyms,
            plurals,
            vocabulary,
        }
    }
}

impl LabelNormalizer {
    /// Built-in tables extended with the configured pairs.
    pub fn from_config(config: &EvaluationConfig) -> Self {
        let mut normalizer = Self::default();
        for (variant, canonical) in &config.label_synonyms {
            let canonical = collapse(canonical);
            normalizer.vocabulary.insert(canonical.clone());
            normalizer.synonyms.insert(collapse(variant), canonical);
        }
        for (plural, singular) in &config.label_plurals {
            let singular = collapse(singular);
            normalizer.vocabulary.insert(singular.clone());
            normalizer.plurals.insert(collapse(plural), singular);
        }
        normalizer
    }

    /// Add known labels (e.g. a model's label set) for the `-s` rule.
    pub fn with_vocabulary<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.vocabulary
            .extend(labels.into_iter().map(|l| collapse(l.as_ref())));
        self
    }

    pub fn normalize(&self, label: &str) -> String {
        let mut s = collapse(label);
        for (variant, canonical) in &self.synonyms {
            if s.contains(variant.as_str()) {
                s = s.replace(variant.as_str(), canonical);
            }
        }

        let (head, last) = match s.rsplit_once(' ') {
            Some((head, last)) => (format!("{head} "), last.to_string()),
            None => (String::new(), s.clone()),
        };

        if let Some(singular) = self.plurals.get(&last) {
            return format!("{head}{singular}");
        }
        if let Some(stem) = last.strip_suffix('s') {
            if !stem.ends_with('s') {
                let candidate = format!("{head}{stem}");
                if self.vocabulary.contains(&candidate) {
                    return candidate;
                }
            }
        }
        s
    }
}

/// Lowercase with whitespace runs collapsed.
fn collapse(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
