use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::NormalizeError;

/// One stopword per line; `#` starts a comment.
pub const STOPWORDS_FILE: &str = "stopwords.txt";
/// `inflected<TAB>lemma` per line; `#` starts a comment.
pub const LEMMAS_FILE: &str = "lemmas.tsv";

/// Stopwords dropped by the simple strategy.
const SIMPLE_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "is", "by", "on", "of",
    "in", "to", "a", "an",
];

/// Turns canonical text into space-joined feature tokens.
pub trait NormalizeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn normalize(&self, canonical: &str) -> Result<String, NormalizeError>;
}

// ═══════════════════════════════════════════════════════════
// Simple strategy
// ═══════════════════════════════════════════════════════════

/// Whitespace tokens, small stopword set, tokens longer than two characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleStrategy;

impl SimpleStrategy {
    pub fn tokens<'a>(&self, canonical: &'a str) -> Vec<&'a str> {
        canonical
            .split_whitespace()
            .filter(|t| t.chars().count() > 2 && !SIMPLE_STOPWORDS.contains(t))
            .collect()
    }
}

impl NormalizeStrategy for SimpleStrategy {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn normalize(&self, canonical: &str) -> Result<String, NormalizeError> {
        Ok(self.tokens(canonical).join(" "))
    }
}

// ═══════════════════════════════════════════════════════════
// Linguistic strategy
// ═══════════════════════════════════════════════════════════

/// Alphabetic word tokens, full stopword list, lemmatized.
#[derive(Debug, Clone)]
pub struct LinguisticStrategy {
    stopwords: HashSet<String>,
    lemmas: HashMap<String, String>,
    max_chars: usize,
}

impl LinguisticStrategy {
    pub fn new(stopwords: HashSet<String>, lemmas: HashMap<String, String>, max_chars: usize) -> Self {
        Self {
            stopwords,
            lemmas,
            max_chars,
        }
    }

    /// Load `stopwords.txt` and `lemmas.tsv` from `dir`.
    pub fn load(dir: &Path, max_chars: usize) -> Result<Self, NormalizeError> {
        let stopwords_path = dir.join(STOPWORDS_FILE);
        let stopwords = read_resource(&stopwords_path)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_lowercase)
            .collect();

        let lemmas_path = dir.join(LEMMAS_FILE);
        let raw = read_resource(&lemmas_path)?;
        let mut lemmas = HashMap::new();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (form, lemma) = line
                .split_once('\t')
                .ok_or_else(|| NormalizeError::MalformedResource {
                    path: lemmas_path.clone(),
                    line: index + 1,
                })?;
            lemmas.insert(form.trim().to_lowercase(), lemma.trim().to_lowercase());
        }

        Ok(Self::new(stopwords, lemmas, max_chars))
    }

    pub fn stopword_count(&self) -> usize {
        self.stopwords.len()
    }

    pub fn lemma_count(&self) -> usize {
        self.lemmas.len()
    }

    /// Exception table first, then noun suffix rules.
    pub fn lemmatize(&self, word: &str) -> String {
        if let Some(lemma) = self.lemmas.get(word) {
            return lemma.clone();
        }
        let len = word.len();
        if len > 4 && word.ends_with("ies") {
            return format!("{}y", &word[..len - 3]);
        }
        for suffix in ["sses", "ches", "shes", "xes"] {
            if word.ends_with(suffix) {
                return word[..len - 2].to_string();
            }
        }
        if len > 3
            && word.ends_with('s')
            && !word.ends_with("ss")
            && !word.ends_with("us")
            && !word.ends_with("is")
        {
            return word[..len - 1].to_string();
        }
        word.to_string()
    }
}

fn read_resource(path: &Path) -> Result<String, NormalizeError> {
    std::fs::read_to_string(path).map_err(|source| NormalizeError::ResourceUnavailable {
        path: path.to_path_buf(),
        source,
    })
}

impl NormalizeStrategy for LinguisticStrategy {
    fn name(&self) -> &'static str {
        "linguistic"
    }

    fn normalize(&self, canonical: &str) -> Result<String, NormalizeError> {
        let chars = canonical.chars().count();
        if chars > self.max_chars {
            return Err(NormalizeError::InputTooLarge {
                chars,
                limit: self.max_chars,
            });
        }

        let tokens: Vec<String> = canonical
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| {
                t.chars().count() > 1
                    && t.chars().all(char::is_alphabetic)
                    && !self.stopwords.contains(*t)
            })
            .map(|t| self.lemmatize(t))
            .collect();

        Ok(tokens.join(" "))
    }
}
