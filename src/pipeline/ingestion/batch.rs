//! Batch ingestion over a bounded worker pool.
//!
//! Each document is loaded on its own watched thread so a hung OCR call can
//! be abandoned after `document_timeout`. Output order equals input order.
//!
//! An abandoned thread cannot be cancelled; it keeps running until its load
//! returns. Once `max_abandoned` such threads are alive, further documents
//! are skipped instead of spawning more.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use walkdir::WalkDir;

use super::loader::DocumentLoader;
use super::types::{Corpus, Document, SkippedDocument};
use super::IngestionError;
use crate::pipeline_config::IngestionConfig;

/// A file to ingest, with its ground-truth label when known.
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub path: PathBuf,
    pub label: Option<String>,
}

impl IngestItem {
    pub fn unlabeled(path: PathBuf) -> Self {
        Self { path, label: None }
    }

    pub fn labeled(path: PathBuf, label: impl Into<String>) -> Self {
        Self {
            path,
            label: Some(label.into()),
        }
    }
}

/// Timed-out loader threads tolerated before new documents are refused.
pub const DEFAULT_MAX_ABANDONED: usize = 16;

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// Shared between a loader thread and the worker waiting on it. Whichever
/// side moves the state first decides whether the thread counts as abandoned.
struct LoaderWatch {
    state: AtomicU8,
    abandoned: Arc<AtomicUsize>,
}

impl LoaderWatch {
    /// Called by the worker on timeout.
    fn abandon(&self) {
        self.abandoned.fetch_add(1, Ordering::SeqCst);
        if self
            .state
            .compare_exchange(RUNNING, ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.abandoned.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for LoaderWatch {
    /// Runs when the last holder, normally the loader thread, lets go.
    fn drop(&mut self) {
        if *self.state.get_mut() == ABANDONED {
            self.abandoned.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct BatchIngestor {
    loader: Arc<DocumentLoader>,
    workers: usize,
    document_timeout: Duration,
    max_abandoned: usize,
    abandoned: Arc<AtomicUsize>,
}

impl BatchIngestor {
    pub fn new(loader: DocumentLoader, config: &IngestionConfig) -> Self {
        Self {
            loader: Arc::new(loader),
            workers: config.workers.max(1),
            document_timeout: Duration::from_secs(config.document_timeout_secs),
            max_abandoned: DEFAULT_MAX_ABANDONED,
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Override the per-document budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.document_timeout = timeout;
        self
    }

    pub fn with_max_abandoned(mut self, max_abandoned: usize) -> Self {
        self.max_abandoned = max_abandoned;
        self
    }

    /// Loader threads still running after their document timed out.
    pub fn abandoned_loaders(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Ingest unlabeled files.
    pub fn ingest_paths(&self, paths: &[PathBuf]) -> Corpus {
        let items: Vec<IngestItem> = paths.iter().cloned().map(IngestItem::unlabeled).collect();
        self.ingest(&items)
    }

    /// Load every item; failures, timeouts and short texts land in `skipped`.
    pub fn ingest(&self, items: &[IngestItem]) -> Corpus {
        let started = Instant::now();

        let outcomes: Vec<Result<Document, SkippedDocument>> =
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .thread_name(|i| format!("lexclass-ingest-{i}"))
                .build()
            {
                Ok(pool) => pool.install(|| items.par_iter().map(|item| self.ingest_one(item)).collect()),
                Err(e) => {
                    tracing::warn!(error = %e, "Worker pool unavailable, ingesting sequentially");
                    items.iter().map(|item| self.ingest_one(item)).collect()
                }
            };

        let mut corpus = Corpus::default();
        for outcome in outcomes {
            match outcome {
                Ok(doc) => corpus.documents.push(doc),
                Err(skipped) => {
                    tracing::warn!(
                        path = %skipped.path.display(),
                        reason = %skipped.reason,
                        "Document skipped"
                    );
                    corpus.skipped.push(skipped);
                }
            }
        }

        tracing::info!(
            requested = items.len(),
            ingested = corpus.documents.len(),
            skipped = corpus.skipped.len(),
            workers = self.workers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch ingestion complete"
        );

        corpus
    }

    fn ingest_one(&self, item: &IngestItem) -> Result<Document, SkippedDocument> {
        let skip = |error: IngestionError| SkippedDocument {
            path: item.path.clone(),
            reason: error.to_string(),
        };

        let abandoned = self.abandoned_loaders();
        if abandoned >= self.max_abandoned {
            return Err(skip(IngestionError::LoaderBacklog { abandoned }));
        }

        let (tx, rx) = mpsc::channel();
        let loader = Arc::clone(&self.loader);
        let path = item.path.clone();
        let watch = Arc::new(LoaderWatch {
            state: AtomicU8::new(RUNNING),
            abandoned: Arc::clone(&self.abandoned),
        });
        let thread_watch = Arc::clone(&watch);
        std::thread::Builder::new()
            .name("lexclass-load".into())
            .spawn(move || {
                let outcome = loader.load(&path);
                let _ = thread_watch.state.compare_exchange(
                    RUNNING,
                    FINISHED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                // The receiver is gone when the document already timed out.
                let _ = tx.send(outcome);
            })
            .map_err(|e| skip(IngestionError::Io(e)))?;

        match rx.recv_timeout(self.document_timeout) {
            Ok(outcome) => outcome.into_document(item.label.clone(), self.loader.settings().min_text_chars),
            Err(RecvTimeoutError::Timeout) => {
                watch.abandon();
                Err(skip(IngestionError::Timeout {
                    secs: self.document_timeout.as_secs(),
                }))
            }
            Err(RecvTimeoutError::Disconnected) => Err(skip(IngestionError::WorkerLost)),
        }
    }
}

/// Regular files under `dir`, recursively, in sorted path order.
/// Hidden files (leading `.`) are ignored.
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, IngestionError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            IngestionError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk loop detected")),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        files.push(entry.into_path());
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingestion::loader::LoaderSettings;
    use crate::pipeline::ingestion::ocr::MockOcrEngine;
    use crate::pipeline::ingestion::pdf::minimal_png;
    use crate::pipeline::ingestion::types::PdfTextLayer;

    struct NoTextLayer;

    impl PdfTextLayer for NoTextLayer {
        fn page_texts(&self, _pdf_bytes: &[u8]) -> Result<Vec<String>, IngestionError> {
            Ok(vec![])
        }
    }

    fn config(workers: usize) -> IngestionConfig {
        IngestionConfig {
            workers,
            document_timeout_secs: 10,
            ..IngestionConfig::default()
        }
    }

    fn ingestor(workers: usize) -> BatchIngestor {
        let loader = DocumentLoader::new(Box::new(NoTextLayer), LoaderSettings::default());
        BatchIngestor::new(loader, &config(workers))
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn output_order_matches_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<IngestItem> = (0..12)
            .map(|i| {
                let body = format!("Contract number {i} between the parties named herein.");
                IngestItem::labeled(write(dir.path(), &format!("doc{i}.txt"), body.as_bytes()), "contract")
            })
            .rev()
            .collect();

        let corpus = ingestor(4).ingest(&items);
        assert_eq!(corpus.len(), 12);
        assert!(corpus.skipped.is_empty());
        for (item, doc) in items.iter().zip(&corpus.documents) {
            assert_eq!(item.path, doc.path);
            assert_eq!(doc.label.as_deref(), Some("contract"));
        }
    }

    #[test]
    fn failures_and_short_texts_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let good = write(dir.path(), "good.txt", b"An affidavit sworn before a commissioner for oaths.");
        let short = write(dir.path(), "short.txt", b"tiny");
        let empty = write(dir.path(), "empty.txt", b"");
        let corrupt = write(dir.path(), "corrupt.pdf", b"garbage bytes");

        let corpus = ingestor(2).ingest_paths(&[good.clone(), short.clone(), empty, corrupt]);

        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.documents[0].path, good);
        assert_eq!(corpus.skipped.len(), 3);
        assert_eq!(corpus.skipped[0].path, short);
        assert!(corpus.skipped[0].reason.contains("too short"));
        assert_eq!(corpus.skipped[1].reason, "File is empty");
        assert!(corpus.skipped[2].reason.contains("does not match"));
    }

    #[test]
    fn hung_ocr_call_is_skipped_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let image = write(dir.path(), "slow.png", &minimal_png());
        let text = write(dir.path(), "fast.txt", b"A ruling delivered in open court on the stated date.");

        let slow = Arc::new(
            MockOcrEngine::new("never arrives in time").with_delay(Duration::from_secs(5)),
        );
        let loader = DocumentLoader::new(Box::new(NoTextLayer), LoaderSettings::default())
            .with_ocr(slow);
        let batch = BatchIngestor::new(loader, &config(2)).with_timeout(Duration::from_millis(200));

        let corpus = batch.ingest_paths(&[image.clone(), text.clone()]);
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.documents[0].path, text);
        assert_eq!(corpus.skipped.len(), 1);
        assert_eq!(corpus.skipped[0].path, image);
        assert!(corpus.skipped[0].reason.contains("timed out"));
    }

    #[test]
    fn abandoned_loaders_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let images: Vec<PathBuf> = (0..4)
            .map(|i| write(dir.path(), &format!("scan{i}.png"), &minimal_png()))
            .collect();

        let slow = Arc::new(MockOcrEngine::new("late").with_delay(Duration::from_secs(3)));
        let loader = DocumentLoader::new(Box::new(NoTextLayer), LoaderSettings::default())
            .with_ocr(slow.clone());
        let batch = BatchIngestor::new(loader, &config(1))
            .with_timeout(Duration::from_millis(50))
            .with_max_abandoned(2);

        let corpus = batch.ingest_paths(&images);
        assert!(corpus.is_empty());
        let reasons: Vec<&str> = corpus.skipped.iter().map(|s| s.reason.as_str()).collect();
        assert!(reasons[0].contains("timed out"), "{reasons:?}");
        assert!(reasons[1].contains("timed out"), "{reasons:?}");
        assert!(reasons[2].contains("still running"), "{reasons:?}");
        assert!(reasons[3].contains("still running"), "{reasons:?}");
        assert_eq!(batch.abandoned_loaders(), 2);
    }

    #[test]
    fn collect_files_is_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        write(dir.path(), "b.txt", b"b");
        write(dir.path(), "a.pdf", b"a");
        write(&dir.path().join("sub"), "c.docx", b"c");
        write(dir.path(), ".hidden", b"h");

        let files = collect_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.txt", "sub/c.docx"]);
    }

    #[test]
    fn collect_files_missing_dir_is_error() {
        assert!(collect_files(Path::new("/nonexistent/lexclass-data")).is_err());
    }
}
