//! Training run.
//!
//! Labeled files are ingested, normalized and split by class into train,
//! validation and test sets. The feature pipeline and classifier are fit on
//! the training split only; the fitted bundle is published with its scores.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::pipeline::artifacts::{ArtifactStore, ModelBundle};
use crate::pipeline::classify::{
    stratified_folds, Classifier, ClassifierKind, LabelSet, ProbabilisticClassifier,
};
use crate::pipeline::evaluation::{
    canonical_key, read_ground_truth, score_labels, GroundTruthRecord, LabelNormalizer,
    MetricsSummary,
};
use crate::pipeline::features::FeaturePipeline;
use crate::pipeline::ingestion::{
    collect_files, BatchIngestor, Corpus, DocumentLoader, IngestItem, SkippedDocument,
};
use crate::pipeline::normalize::{degrade_all, TextNormalizer};
use crate::pipeline::service::Services;
use crate::pipeline_config::PipelineConfig;
use crate::LexclassError;

/// Row indices of each split, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
    pub test: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidation {
    pub folds: usize,
    pub scores: Vec<f64>,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub bundle_id: String,
    pub classifier: ClassifierKind,
    pub normalizer: &'static str,
    pub documents: usize,
    pub skipped: Vec<SkippedDocument>,
    /// Ground-truth rows with no matching file or no label.
    pub unresolved: Vec<String>,
    pub train_size: usize,
    pub valid_size: usize,
    pub test_size: usize,
    pub vocabulary_size: usize,
    pub selected_features: usize,
    pub labels: Vec<String>,
    pub validation: Option<MetricsSummary>,
    pub test: Option<MetricsSummary>,
    pub cross_validation: Option<CrossValidation>,
    pub oob_score: Option<f64>,
}

// ═══════════════════════════════════════════════════════════
// Entry points
// ═══════════════════════════════════════════════════════════

/// Full training run from the configured ground-truth table.
pub fn train(config: &PipelineConfig, services: &Services) -> Result<TrainingReport, LexclassError> {
    let records = read_ground_truth(&config.paths.labels_csv)?;
    let labels = LabelNormalizer::from_config(&config.evaluation);
    let (items, unresolved) = resolve_items(&records, &config.paths.dataset_dir, &labels)?;

    tracing::info!(
        rows = records.len(),
        resolved = items.len(),
        unresolved = unresolved.len(),
        dataset_dir = %config.paths.dataset_dir.display(),
        "Ground truth resolved"
    );

    let loader = DocumentLoader::from_config(&config.ingestion, services);
    let corpus = BatchIngestor::new(loader, &config.ingestion).ingest(&items);
    let normalizer = TextNormalizer::from_config(&config.normalize, &config.paths.resource_dir);

    let mut report = train_on_corpus(config, corpus, &normalizer)?;
    report.unresolved = unresolved;
    Ok(report)
}

/// Train on an already ingested, labeled corpus and publish the bundle.
pub fn train_on_corpus(
    config: &PipelineConfig,
    mut corpus: Corpus,
    normalizer: &TextNormalizer,
) -> Result<TrainingReport, LexclassError> {
    normalizer.normalize_corpus(&mut corpus);
    let (texts, labels): (Vec<String>, Vec<String>) = corpus
        .documents
        .iter()
        .filter_map(|d| {
            d.label
                .as_ref()
                .map(|label| (d.feature_text().to_string(), label.clone()))
        })
        .unzip();
    if texts.is_empty() {
        return Err(LexclassError::NoDocuments(format!(
            "no labeled document survived ingestion ({} skipped)",
            corpus.skipped.len()
        )));
    }

    let split = stratified_split(
        &labels,
        config.split.valid_fraction,
        config.split.test_fraction,
        config.seed,
    );
    let mut train_texts = pick(&texts, &split.train);
    let train_labels = pick(&labels, &split.train);
    if config.normalize.degrade_rate > 0.0 {
        train_texts = degrade_all(&train_texts, config.normalize.degrade_rate, config.seed);
    }

    tracing::info!(
        documents = texts.len(),
        train = split.train.len(),
        valid = split.valid.len(),
        test = split.test.len(),
        classifier = %config.classifier.kind,
        "Fitting model"
    );

    let bundle = fit_bundle(config, &train_texts, &train_labels)?;
    let validation = score_split(&bundle, &texts, &labels, &split.valid)?;
    let test = score_split(&bundle, &texts, &labels, &split.test)?;
    let cross_validation = cross_validate(config, &train_texts, &train_labels);
    let oob_score = bundle.classifier.oob_score();

    let mut metrics = BTreeMap::new();
    if let Some(m) = &validation {
        metrics.insert("validation_accuracy".to_string(), m.accuracy);
        metrics.insert("validation_weighted_f1".to_string(), m.weighted_f1);
    }
    if let Some(m) = &test {
        metrics.insert("test_accuracy".to_string(), m.accuracy);
        metrics.insert("test_weighted_f1".to_string(), m.weighted_f1);
    }
    if let Some(cv) = &cross_validation {
        metrics.insert("cv_accuracy_mean".to_string(), cv.mean);
        metrics.insert("cv_accuracy_std".to_string(), cv.std);
    }
    if let Some(oob) = oob_score {
        metrics.insert("oob_accuracy".to_string(), oob);
    }

    let store = ArtifactStore::new(&config.paths.artifact_dir);
    let manifest = store.publish(&bundle, metrics)?;

    Ok(TrainingReport {
        bundle_id: manifest.bundle_id.to_string(),
        classifier: manifest.classifier_kind,
        normalizer: normalizer.strategy_name(),
        documents: texts.len(),
        skipped: corpus.skipped,
        unresolved: Vec::new(),
        train_size: split.train.len(),
        valid_size: split.valid.len(),
        test_size: split.test.len(),
        vocabulary_size: manifest.vocabulary_size,
        selected_features: manifest.selected_features,
        labels: manifest.labels,
        validation,
        test,
        cross_validation,
        oob_score,
    })
}

// ═══════════════════════════════════════════════════════════
// Ground-truth resolution
// ═══════════════════════════════════════════════════════════

/// Map ground-truth rows to files under `dataset_dir`, labels normalized.
/// A row resolves by direct path first, then by canonical file name.
pub fn resolve_items(
    records: &[GroundTruthRecord],
    dataset_dir: &Path,
    labels: &LabelNormalizer,
) -> Result<(Vec<IngestItem>, Vec<String>), LexclassError> {
    let mut by_key: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in collect_files(dataset_dir)? {
        if let Some(name) = path.file_name() {
            by_key
                .entry(canonical_key(&name.to_string_lossy(), false))
                .or_insert(path);
        }
    }

    let mut items = Vec::new();
    let mut unresolved = Vec::new();
    let mut seen = BTreeSet::new();
    for record in records {
        let label = labels.normalize(&record.label);
        let direct = dataset_dir.join(record.filename.trim());
        let path = if direct.is_file() {
            Some(direct)
        } else {
            by_key.get(&canonical_key(&record.filename, false)).cloned()
        };

        match path {
            Some(path) if !label.is_empty() => {
                if seen.insert(path.clone()) {
                    items.push(IngestItem::labeled(path, label));
                }
            }
            _ => {
                tracing::debug!(filename = %record.filename, "Ground-truth row not resolved");
                unresolved.push(record.filename.clone());
            }
        }
    }
    Ok((items, unresolved))
}

// ═══════════════════════════════════════════════════════════
// Splits & scoring
// ═══════════════════════════════════════════════════════════

/// Seeded per-class split. Every class keeps at least one training row.
pub fn stratified_split(
    labels: &[String],
    valid_fraction: f64,
    test_fraction: f64,
    seed: u64,
) -> SplitIndices {
    let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        by_class.entry(label.as_str()).or_default().push(i);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = SplitIndices::default();
    for members in by_class.values_mut() {
        members.shuffle(&mut rng);
        let n = members.len();
        let n_test = ((n as f64 * test_fraction).round() as usize).min(n - 1);
        let n_valid = ((n as f64 * valid_fraction).round() as usize).min(n - 1 - n_test);
        split.test.extend_from_slice(&members[..n_test]);
        split
            .valid
            .extend_from_slice(&members[n_test..n_test + n_valid]);
        split.train.extend_from_slice(&members[n_test + n_valid..]);
    }
    split.train.sort_unstable();
    split.valid.sort_unstable();
    split.test.sort_unstable();
    split
}

fn pick<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| items[i].clone()).collect()
}

fn fit_bundle(
    config: &PipelineConfig,
    texts: &[String],
    labels: &[String],
) -> Result<ModelBundle, LexclassError> {
    let mut features = FeaturePipeline::from_config(&config.features);
    let x = features.fit(texts, labels)?;
    let mut classifier = Classifier::from_config(&config.classifier, config.seed);
    classifier.fit(&x, labels)?;
    Ok(ModelBundle::new(features, classifier))
}

fn score_bundle(
    bundle: &ModelBundle,
    texts: &[String],
    labels: &[String],
) -> Result<MetricsSummary, LexclassError> {
    let x = bundle.features.transform(texts)?;
    let predicted = bundle.classifier.predict(&x)?;
    Ok(score_labels(labels, &predicted))
}

fn score_split(
    bundle: &ModelBundle,
    texts: &[String],
    labels: &[String],
    indices: &[usize],
) -> Result<Option<MetricsSummary>, LexclassError> {
    if indices.is_empty() {
        return Ok(None);
    }
    score_bundle(bundle, &pick(texts, indices), &pick(labels, indices)).map(Some)
}

/// k-fold accuracy on the training split, refitting features per fold.
/// Folds that cannot be fit are logged and left out.
fn cross_validate(
    config: &PipelineConfig,
    texts: &[String],
    labels: &[String],
) -> Option<CrossValidation> {
    if config.split.cv_folds == 0 {
        return None;
    }
    let label_set = LabelSet::from_labels(labels);
    let classes = label_set.encode(labels).ok()?;
    let smallest = label_set.counts(&classes).into_iter().min().unwrap_or(0);
    let k = config.split.cv_folds.min(smallest);
    if k < 2 {
        tracing::warn!(
            smallest_class = smallest,
            "Too few samples per class for cross-validation"
        );
        return None;
    }

    let folds = stratified_folds(&classes, k, Some(config.seed));
    let mut scores = Vec::with_capacity(k);
    for fold in 0..k {
        let (held, fit): (Vec<usize>, Vec<usize>) = (0..texts.len()).partition(|&i| folds[i] == fold);
        let scored = fit_bundle(config, &pick(texts, &fit), &pick(labels, &fit)).and_then(|bundle| {
            score_bundle(&bundle, &pick(texts, &held), &pick(labels, &held))
        });
        match scored {
            Ok(m) => scores.push(m.accuracy),
            Err(e) => tracing::warn!(fold, error = %e, "Cross-validation fold failed"),
        }
    }
    if scores.is_empty() {
        return None;
    }

    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let std = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64).sqrt();
    tracing::info!(folds = k, mean, std, "Cross-validation complete");
    Some(CrossValidation {
        folds: k,
        scores,
        mean,
        std,
    })
}
