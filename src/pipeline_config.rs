//! Pipeline configuration.
//!
//! Every path, threshold, and model-selection choice the pipeline reads lives
//! here as a named field. The structure is loaded once (JSON) and passed into
//! the components at construction time; nothing below reads the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::pipeline::classify::{ClassifierKind, ForestParams, SvmParams};
use crate::pipeline::features::VectorizerParams;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Filesystem locations used by training, inference and evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root the ground-truth filenames are resolved against.
    pub dataset_dir: PathBuf,
    /// Ground-truth table (filename + label columns).
    pub labels_csv: PathBuf,
    /// Artifact store root (published bundles + CURRENT pointer).
    pub artifact_dir: PathBuf,
    /// Linguistic resources for the advanced normalizer.
    pub resource_dir: PathBuf,
    /// Where prediction tables and reports are written.
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("dataset"),
            labels_csv: PathBuf::from("dataset/labels.csv"),
            artifact_dir: config::models_dir(),
            resource_dir: config::resources_dir(),
            output_dir: config::outputs_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Documents whose final text is shorter than this are excluded.
    /// Also the direct-PDF-text threshold below which pages are OCR'd.
    pub min_text_chars: usize,
    /// Rasterization DPI for OCR of page documents.
    pub render_dpi: u32,
    /// Upper bound on concurrently loaded documents.
    pub workers: usize,
    /// Wall-clock budget for a single document (including all OCR calls).
    pub document_timeout_secs: u64,
    /// Files above this size are treated as unsupported.
    pub max_file_bytes: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 30,
            render_dpi: 200,
            workers: 4,
            document_timeout_secs: 120,
            max_file_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Inputs above this size are rejected by the linguistic tokenizer
    /// (the simple strategy then handles them).
    pub max_tokenizer_chars: usize,
    /// Fraction of words randomly dropped from training texts. 0 disables.
    pub degrade_rate: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_tokenizer_chars: 2_000_000,
            degrade_rate: 0.07,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub vectorizer: VectorizerParams,
    /// Number of chi-squared-selected columns kept (clamped to vocabulary size).
    pub k_best: usize,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            vectorizer: VectorizerParams::default(),
            k_best: 3000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    pub forest: ForestParams,
    pub svm: SvmParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub valid_fraction: f64,
    pub test_fraction: f64,
    /// Folds for cross-validated accuracy on the training split. 0 disables.
    pub cv_folds: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            valid_fraction: 0.15,
            test_fraction: 0.15,
            cv_folds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Drop the file extension when computing canonical join keys.
    pub drop_extension: bool,
    /// Max unmatched keys reported per side when nothing matches.
    pub diagnostic_sample: usize,
    /// Extra label synonyms (variant → canonical), applied after the built-ins.
    pub label_synonyms: BTreeMap<String, String>,
    /// Extra plural → singular pairs for label words.
    pub label_plurals: BTreeMap<String, String>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            drop_extension: true,
            diagnostic_sample: 20,
            label_synonyms: BTreeMap::new(),
            label_plurals: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// OCR collaborator endpoint. When absent, OCR-requiring documents are skipped.
    pub ocr_endpoint: Option<String>,
    /// Summarization collaborator endpoint.
    pub summarize_endpoint: Option<String>,
    /// Optional bearer token sent to both collaborators.
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            ocr_endpoint: None,
            summarize_endpoint: None,
            api_token: None,
            timeout_secs: 120,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub ingestion: IngestionConfig,
    pub normalize: NormalizeConfig,
    pub features: FeaturesConfig,
    pub classifier: ClassifierConfig,
    pub split: SplitConfig,
    pub evaluation: EvaluationConfig,
    pub services: ServicesConfig,
    /// Seed for splits, degradation, bootstrap and calibration folds.
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            ingestion: IngestionConfig::default(),
            normalize: NormalizeConfig::default(),
            features: FeaturesConfig::default(),
            classifier: ClassifierConfig::default(),
            split: SplitConfig::default(),
            evaluation: EvaluationConfig::default(),
            services: ServicesConfig::default(),
            seed: 42,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loading & validation
// ═══════════════════════════════════════════════════════════

impl PipelineConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        tracing::info!(
            path = %path.display(),
            classifier = ?config.classifier.kind,
            k_best = config.features.k_best,
            "Pipeline configuration loaded"
        );
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.features.vectorizer;
        if !(v.max_df > 0.0 && v.max_df <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "features.vectorizer.max_df must be in (0, 1], got {}",
                v.max_df
            )));
        }
        if v.min_df == 0 {
            return Err(ConfigError::Invalid(
                "features.vectorizer.min_df must be at least 1".into(),
            ));
        }
        if v.max_features == 0 || self.features.k_best == 0 {
            return Err(ConfigError::Invalid(
                "features.vectorizer.max_features and features.k_best must be positive".into(),
            ));
        }
        if !(1..=2).contains(&v.ngram_max) {
            return Err(ConfigError::Invalid(format!(
                "features.vectorizer.ngram_max must be 1 or 2, got {}",
                v.ngram_max
            )));
        }
        if self.ingestion.workers == 0 {
            return Err(ConfigError::Invalid("ingestion.workers must be at least 1".into()));
        }
        if self.ingestion.document_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "ingestion.document_timeout_secs must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.normalize.degrade_rate) {
            return Err(ConfigError::Invalid(format!(
                "normalize.degrade_rate must be in [0, 1), got {}",
                self.normalize.degrade_rate
            )));
        }
        let s = &self.split;
        if s.valid_fraction < 0.0 || s.test_fraction < 0.0 || s.valid_fraction + s.test_fraction >= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "split fractions must be non-negative and sum below 1 (valid {}, test {})",
                s.valid_fraction, s.test_fraction
            )));
        }
        if s.cv_folds == 1 {
            return Err(ConfigError::Invalid(
                "split.cv_folds must be 0 (disabled) or at least 2".into(),
            ));
        }
        if self.classifier.svm.calibration_folds < 2 {
            return Err(ConfigError::Invalid(
                "classifier.svm.calibration_folds must be at least 2".into(),
            ));
        }
        if self.classifier.forest.n_estimators == 0 {
            return Err(ConfigError::Invalid(
                "classifier.forest.n_estimators must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
