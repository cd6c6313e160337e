//! Inference with a published bundle, and table-to-table evaluation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::pipeline::artifacts::{ArtifactStore, BundleManifest, LoadedBundle, ModelBundle};
use crate::pipeline::classify::{argmax, ClassifierError, ProbabilisticClassifier};
use crate::pipeline::evaluation::{
    evaluate, read_ground_truth, read_predictions, write_prediction_table, EvaluationReport,
    LabelNormalizer, PredictionRecord, ReconcileOptions,
};
use crate::pipeline::ingestion::{collect_files, BatchIngestor, Document, SkippedDocument};
use crate::pipeline::normalize::TextNormalizer;
use crate::pipeline_config::{EvaluationConfig, PipelineConfig};
use crate::LexclassError;

/// Predictions for a directory, with the files that could not be read.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryPredictions {
    pub predictions: Vec<PredictionRecord>,
    pub skipped: Vec<SkippedDocument>,
}

/// A loaded bundle plus the normalizer its texts go through.
pub struct Predictor {
    manifest: BundleManifest,
    bundle: ModelBundle,
    normalizer: TextNormalizer,
}

impl Predictor {
    pub fn from_bundle(loaded: LoadedBundle, normalizer: TextNormalizer) -> Self {
        Self {
            manifest: loaded.manifest,
            bundle: loaded.bundle,
            normalizer,
        }
    }

    /// Current bundle of the configured store, configured normalizer.
    pub fn load(config: &PipelineConfig) -> Result<Self, LexclassError> {
        let loaded = ArtifactStore::new(&config.paths.artifact_dir).load_current()?;
        let normalizer = TextNormalizer::from_config(&config.normalize, &config.paths.resource_dir);
        Ok(Self::from_bundle(loaded, normalizer))
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    /// Classify raw texts, each paired with the file name to report.
    pub fn predict_texts<N, T>(&self, documents: &[(N, T)]) -> Result<Vec<PredictionRecord>, LexclassError>
    where
        N: AsRef<str>,
        T: AsRef<str>,
    {
        let names: Vec<&str> = documents.iter().map(|(n, _)| n.as_ref()).collect();
        let texts: Vec<String> = documents
            .iter()
            .map(|(_, t)| self.normalizer.normalize(t.as_ref()))
            .collect();
        self.predict_normalized(&names, &texts)
    }

    /// Classify ingested documents, reusing their normalized text when set.
    pub fn predict_documents(&self, documents: &[Document]) -> Result<Vec<PredictionRecord>, LexclassError> {
        let names: Vec<String> = documents.iter().map(Document::file_name).collect();
        let texts: Vec<String> = documents
            .iter()
            .map(|d| match &d.normalized {
                Some(normalized) => normalized.clone(),
                None => self.normalizer.normalize(&d.text),
            })
            .collect();
        self.predict_normalized(&names, &texts)
    }

    /// Ingest every file under `dir` and classify what could be read.
    pub fn predict_directory(
        &self,
        dir: &Path,
        ingestor: &BatchIngestor,
    ) -> Result<DirectoryPredictions, LexclassError> {
        let files = collect_files(dir)?;
        let corpus = ingestor.ingest_paths(&files);
        let predictions = self.predict_documents(&corpus.documents)?;

        tracing::info!(
            dir = %dir.display(),
            files = files.len(),
            predicted = predictions.len(),
            skipped = corpus.skipped.len(),
            "Directory classified"
        );
        Ok(DirectoryPredictions {
            predictions,
            skipped: corpus.skipped,
        })
    }

    fn predict_normalized<N: AsRef<str>>(
        &self,
        names: &[N],
        texts: &[String],
    ) -> Result<Vec<PredictionRecord>, LexclassError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let x = self.bundle.features.transform(texts)?;
        let probabilities = self.bundle.classifier.predict_proba(&x)?;
        let labels = self
            .bundle
            .classifier
            .labels()
            .ok_or(ClassifierError::NotFit)?;

        Ok(names
            .iter()
            .zip(probabilities)
            .map(|(name, row)| {
                let best = argmax(&row);
                let confidence = row[best];
                let by_label: BTreeMap<String, f64> = labels
                    .as_slice()
                    .iter()
                    .cloned()
                    .zip(row)
                    .collect();
                PredictionRecord::new(name.as_ref(), labels.label(best))
                    .with_confidence(confidence)
                    .with_probabilities(by_label)
            })
            .collect())
    }
}

/// Write `filename,predicted,confidence`.
pub fn write_predictions(path: &Path, records: &[PredictionRecord]) -> Result<(), LexclassError> {
    write_prediction_table(path, records)?;
    tracing::info!(path = %path.display(), rows = records.len(), "Prediction table written");
    Ok(())
}

/// Evaluate a prediction table against a ground-truth table.
pub fn evaluate_tables(
    predictions_csv: &Path,
    labels_csv: &Path,
    config: &EvaluationConfig,
) -> Result<EvaluationReport, LexclassError> {
    let predictions = read_predictions(predictions_csv)?;
    let truths = read_ground_truth(labels_csv)?;
    let report = evaluate(
        &predictions,
        &truths,
        &ReconcileOptions::from(config),
        &LabelNormalizer::from_config(config),
    )?;
    Ok(report)
}
