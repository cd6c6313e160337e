//! Train → publish → load → predict → evaluate on a synthetic corpus.

use std::path::Path;

use lexclass::pipeline::artifacts::ArtifactStore;
use lexclass::pipeline::classify::{ClassifierKind, ForestParams};
use lexclass::pipeline::evaluation::{evaluate, GroundTruthRecord, LabelNormalizer, ReconcileOptions};
use lexclass::pipeline::features::VectorizerParams;
use lexclass::pipeline::inference::{evaluate_tables, write_predictions, Predictor};
use lexclass::pipeline::ingestion::{BatchIngestor, DocumentLoader, IngestItem};
use lexclass::pipeline::normalize::TextNormalizer;
use lexclass::pipeline::service::Services;
use lexclass::pipeline::training::{train, train_on_corpus};
use lexclass::pipeline_config::PipelineConfig;

const CLASSES: [(&str, [&str; 6]); 3] = [
    ("petition", ["petitioner", "relief", "applicant", "prays", "hearing", "tribunal"]),
    ("contract", ["agreement", "party", "clause", "consideration", "terms", "signed"]),
    ("affidavit", ["sworn", "deponent", "oath", "commissioner", "solemnly", "declare"]),
];

fn document(words: &[&str; 6], i: usize) -> String {
    format!(
        "{} {} filed as record number{i}.",
        words.join(" "),
        words[i % words.len()]
    )
}

fn write_training_set(root: &Path) -> PipelineConfig {
    let dataset = root.join("dataset");
    std::fs::create_dir_all(&dataset).unwrap();
    let mut labels = String::from("file_name,category\n");
    for (label, words) in CLASSES {
        for i in 0..12 {
            let name = format!("{label}-{i:02}.txt");
            std::fs::write(dataset.join(&name), document(&words, i)).unwrap();
            labels.push_str(&format!("\"{name}\",{label}s\n"));
        }
    }
    std::fs::write(root.join("labels.csv"), labels).unwrap();

    let mut config = PipelineConfig::default();
    config.paths.dataset_dir = dataset;
    config.paths.labels_csv = root.join("labels.csv");
    config.paths.artifact_dir = root.join("models");
    config.paths.resource_dir = root.join("resources");
    config.paths.output_dir = root.join("outputs");
    config.features.vectorizer = VectorizerParams {
        min_df: 2,
        ..VectorizerParams::default()
    };
    config.split.cv_folds = 3;
    config
}

#[test]
fn train_predict_evaluate_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let config = write_training_set(root.path());
    let services = Services::none();

    let report = train(&config, &services).unwrap();
    assert_eq!(report.classifier, ClassifierKind::CalibratedSvm);
    assert_eq!(report.documents, 36);
    assert_eq!(report.labels, vec!["affidavit", "contract", "petition"]);
    assert!(report.skipped.is_empty());
    assert!(report.validation.is_some());

    let store = ArtifactStore::new(&config.paths.artifact_dir);
    assert_eq!(store.list_bundles().unwrap(), vec![report.bundle_id.clone()]);

    // Unseen documents, named differently from the ground-truth table.
    let unseen = root.path().join("unseen");
    std::fs::create_dir_all(&unseen).unwrap();
    let mut truth = String::from("filename,label\n");
    for (label, words) in CLASSES {
        for i in 20..23 {
            let name = format!("Scan_{label}_{i}.txt");
            std::fs::write(unseen.join(&name), document(&words, i)).unwrap();
            truth.push_str(&format!("/archive/{},{}\n", name.to_lowercase(), label.to_uppercase()));
        }
    }
    std::fs::write(unseen.join("blank.txt"), b"").unwrap();
    let truth_csv = root.path().join("truth.csv");
    std::fs::write(&truth_csv, truth).unwrap();

    let predictor = Predictor::load(&config).unwrap();
    assert_eq!(predictor.manifest().bundle_id.to_string(), report.bundle_id);
    let ingestor = BatchIngestor::new(
        DocumentLoader::from_config(&config.ingestion, &services),
        &config.ingestion,
    );
    let result = predictor.predict_directory(&unseen, &ingestor).unwrap();
    assert_eq!(result.predictions.len(), 9);
    assert_eq!(result.skipped.len(), 1);
    for record in &result.predictions {
        let confidence = record.confidence.unwrap();
        assert!((0.0..=1.0).contains(&confidence));
        let total: f64 = record.probabilities.as_ref().unwrap().values().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    let predictions_csv = config.paths.output_dir.join("predictions.csv");
    std::fs::create_dir_all(&config.paths.output_dir).unwrap();
    write_predictions(&predictions_csv, &result.predictions).unwrap();

    let evaluation = evaluate_tables(&predictions_csv, &truth_csv, &config.evaluation).unwrap();
    assert_eq!(evaluation.matched, 9);
    assert_eq!(evaluation.unmatched_predictions, 0);
    assert!(evaluation.metrics.accuracy >= 0.8);
    assert_eq!(evaluation.metrics.confusion.labels.len(), 3);
}

#[test]
fn four_document_corpus_gives_two_by_two_confusion() {
    let root = tempfile::tempdir().unwrap();
    let dataset = root.path().join("dataset");
    std::fs::create_dir_all(&dataset).unwrap();
    let documents = [
        ("a1.txt", "A", "Petitioner seeks relief and prays the tribunal grant a hearing."),
        ("a2.txt", "A", "The petitioner prays for relief at the tribunal hearing today."),
        ("b1.txt", "B", "Contract agreement between each party with clause consideration."),
        ("b2.txt", "B", "This agreement binds the party to every clause and consideration."),
    ];
    let items: Vec<IngestItem> = documents
        .iter()
        .map(|(name, label, text)| {
            std::fs::write(dataset.join(name), text).unwrap();
            IngestItem::labeled(dataset.join(name), *label)
        })
        .collect();

    let mut config = PipelineConfig::default();
    config.paths.dataset_dir = dataset;
    config.paths.artifact_dir = root.path().join("models");
    config.paths.resource_dir = root.path().join("resources");
    config.features.vectorizer = VectorizerParams {
        min_df: 1,
        ..VectorizerParams::default()
    };
    config.classifier.kind = ClassifierKind::RandomForest;
    config.classifier.forest = ForestParams {
        n_estimators: 9,
        min_samples_split: 2,
        min_samples_leaf: 1,
        bootstrap: false,
        ..ForestParams::default()
    };
    config.normalize.degrade_rate = 0.0;

    let services = Services::none();
    let ingestor = BatchIngestor::new(
        DocumentLoader::from_config(&config.ingestion, &services),
        &config.ingestion,
    );
    let corpus = ingestor.ingest(&items);
    assert_eq!(corpus.len(), 4);
    let normalizer = TextNormalizer::from_config(&config.normalize, &config.paths.resource_dir);
    let report = train_on_corpus(&config, corpus, &normalizer).unwrap();
    assert_eq!(report.train_size, 4);

    let predictor = Predictor::load(&config).unwrap();
    let texts: Vec<(&str, &str)> = documents.iter().map(|(name, _, text)| (*name, *text)).collect();
    let predictions = predictor.predict_texts(&texts).unwrap();
    let truths: Vec<GroundTruthRecord> = documents
        .iter()
        .map(|(name, label, _)| GroundTruthRecord::new(*name, *label))
        .collect();

    let evaluation = evaluate(
        &predictions,
        &truths,
        &ReconcileOptions::default(),
        &LabelNormalizer::default(),
    )
    .unwrap();
    assert_eq!(evaluation.matched, 4);
    let confusion = &evaluation.metrics.confusion;
    assert_eq!(confusion.labels, vec!["a", "b"]);
    assert_eq!(confusion.counts.len(), 2);
    assert!(confusion.counts.iter().all(|row| row.len() == 2));
    assert_eq!(confusion.counts.iter().flatten().sum::<usize>(), 4);
    assert!((0.0..=1.0).contains(&evaluation.metrics.accuracy));
}
