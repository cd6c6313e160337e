//! Model artifact store.
//!
//! A bundle is one directory holding the fitted vectorizer, selector and
//! classifier plus a manifest with their checksums. Bundles are staged in a
//! temporary directory, renamed into `bundles/<id>`, and only then made
//! current by atomically replacing the `CURRENT` pointer file. Readers go
//! through `CURRENT`, so they never see a half-written bundle.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::classify::{Classifier, ClassifierKind, ProbabilisticClassifier};
use crate::pipeline::features::{Chi2Selector, FeaturePipeline, TfidfVectorizer};

pub const FORMAT_VERSION: u32 = 1;

const CURRENT_FILE: &str = "CURRENT";
const BUNDLES_DIR: &str = "bundles";
const MANIFEST_FILE: &str = "manifest.json";
const VECTORIZER_FILE: &str = "vectorizer.json";
const SELECTOR_FILE: &str = "selector.json";
const CLASSIFIER_FILE: &str = "classifier.json";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Artifact I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot (de)serialize {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No bundle has been published under {0}")]
    NoCurrentBundle(PathBuf),

    #[error("Bundle format version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error("{stage} expects {expected} input columns but receives {actual}")]
    DimensionMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Bundle component {0} is not fit")]
    NotFit(&'static str),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// SHA-256 of `bytes`, base64 encoded.
pub fn checksum(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub bundle_id: Uuid,
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub classifier_kind: ClassifierKind,
    pub vocabulary_size: usize,
    pub selected_features: usize,
    pub labels: Vec<String>,
    /// File name → checksum.
    pub checksums: BTreeMap<String, String>,
    /// Scores recorded at training time (e.g. validation accuracy).
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Fitted feature pipeline and classifier, published and loaded together.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBundle {
    pub features: FeaturePipeline,
    pub classifier: Classifier,
}

impl ModelBundle {
    pub fn new(features: FeaturePipeline, classifier: Classifier) -> Self {
        Self {
            features,
            classifier,
        }
    }

    /// Every stage fit, and each stage's input width equal to the previous
    /// stage's output width.
    pub fn check_consistency(&self) -> Result<(), ArtifactError> {
        let vocabulary = self
            .features
            .vectorizer
            .vocabulary_len()
            .ok_or(ArtifactError::NotFit("vectorizer"))?;
        let selector_input = self
            .features
            .selector
            .input_width()
            .ok_or(ArtifactError::NotFit("selector"))?;
        let selected = self
            .features
            .selector
            .output_width()
            .ok_or(ArtifactError::NotFit("selector"))?;
        let classifier_input = self
            .classifier
            .n_features()
            .ok_or(ArtifactError::NotFit("classifier"))?;

        if selector_input != vocabulary {
            return Err(ArtifactError::DimensionMismatch {
                stage: "selector",
                expected: selector_input,
                actual: vocabulary,
            });
        }
        if classifier_input != selected {
            return Err(ArtifactError::DimensionMismatch {
                stage: "classifier",
                expected: classifier_input,
                actual: selected,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedBundle {
    pub dir: PathBuf,
    pub manifest: BundleManifest,
    pub bundle: ModelBundle,
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bundles_dir(&self) -> PathBuf {
        self.root.join(BUNDLES_DIR)
    }

    /// Write a new bundle and make it current.
    pub fn publish(
        &self,
        bundle: &ModelBundle,
        metrics: BTreeMap<String, f64>,
    ) -> Result<BundleManifest, ArtifactError> {
        bundle.check_consistency()?;

        let bundles = self.bundles_dir();
        fs::create_dir_all(&bundles).map_err(io_error(&bundles))?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)
            .map_err(io_error(&self.root))?;

        let mut checksums = BTreeMap::new();
        for (file, bytes) in [
            (VECTORIZER_FILE, to_json(&bundle.features.vectorizer, VECTORIZER_FILE)?),
            (SELECTOR_FILE, to_json(&bundle.features.selector, SELECTOR_FILE)?),
            (CLASSIFIER_FILE, to_json(&bundle.classifier, CLASSIFIER_FILE)?),
        ] {
            let path = staging.path().join(file);
            fs::write(&path, &bytes).map_err(io_error(&path))?;
            checksums.insert(file.to_string(), checksum(&bytes));
        }

        let manifest = BundleManifest {
            bundle_id: Uuid::new_v4(),
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
            classifier_kind: bundle.classifier.kind(),
            vocabulary_size: bundle.features.vectorizer.vocabulary_len().unwrap_or(0),
            selected_features: bundle.features.output_width().unwrap_or(0),
            labels: bundle
                .classifier
                .labels()
                .map(|l| l.as_slice().to_vec())
                .unwrap_or_default(),
            checksums,
            metrics,
        };
        let manifest_path = staging.path().join(MANIFEST_FILE);
        let manifest_bytes = serde_json::to_vec_pretty(&manifest).map_err(|source| {
            ArtifactError::Serialization {
                path: manifest_path.clone(),
                source,
            }
        })?;
        fs::write(&manifest_path, manifest_bytes).map_err(io_error(&manifest_path))?;

        let id = manifest.bundle_id.to_string();
        let target = bundles.join(&id);
        fs::rename(staging.path(), &target).map_err(io_error(&target))?;
        self.point_current_at(&id)?;

        tracing::info!(
            bundle_id = %id,
            kind = %manifest.classifier_kind,
            vocabulary = manifest.vocabulary_size,
            selected = manifest.selected_features,
            labels = manifest.labels.len(),
            "Model bundle published"
        );
        Ok(manifest)
    }

    fn point_current_at(&self, id: &str) -> Result<(), ArtifactError> {
        let current = self.root.join(CURRENT_FILE);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(io_error(&self.root))?;
        tmp.write_all(id.as_bytes()).map_err(io_error(tmp.path()))?;
        tmp.persist(&current).map_err(|e| ArtifactError::Io {
            path: current.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Id of the current bundle, if any has been published.
    pub fn current_id(&self) -> Result<Option<String>, ArtifactError> {
        let current = self.root.join(CURRENT_FILE);
        match fs::read_to_string(&current) {
            Ok(id) => Ok(Some(id.trim().to_string()).filter(|id| !id.is_empty())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArtifactError::Io {
                path: current,
                source,
            }),
        }
    }

    pub fn load_current(&self) -> Result<LoadedBundle, ArtifactError> {
        let id = self
            .current_id()?
            .ok_or_else(|| ArtifactError::NoCurrentBundle(self.root.clone()))?;
        Self::load(&self.bundles_dir().join(id))
    }

    /// Load and verify a bundle directory.
    pub fn load(dir: &Path) -> Result<LoadedBundle, ArtifactError> {
        let manifest: BundleManifest = from_json(&read(&dir.join(MANIFEST_FILE))?, &dir.join(MANIFEST_FILE))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion {
                found: manifest.format_version,
                expected: FORMAT_VERSION,
            });
        }

        let vectorizer: TfidfVectorizer = load_component(dir, VECTORIZER_FILE, &manifest)?;
        let selector: Chi2Selector = load_component(dir, SELECTOR_FILE, &manifest)?;
        let classifier: Classifier = load_component(dir, CLASSIFIER_FILE, &manifest)?;

        let bundle = ModelBundle::new(FeaturePipeline::from_parts(vectorizer, selector), classifier);
        bundle.check_consistency()?;

        tracing::info!(
            bundle_id = %manifest.bundle_id,
            dir = %dir.display(),
            "Model bundle loaded"
        );
        Ok(LoadedBundle {
            dir: dir.to_path_buf(),
            manifest,
            bundle,
        })
    }

    /// Published bundle ids, sorted.
    pub fn list_bundles(&self) -> Result<Vec<String>, ArtifactError> {
        let bundles = self.bundles_dir();
        let entries = match fs::read_dir(&bundles) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(ArtifactError::Io { path: bundles, source }),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(&bundles))?;
            if entry.path().join(MANIFEST_FILE).is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(io_error(path))
}

fn to_json<T: Serialize>(value: &T, file: &str) -> Result<Vec<u8>, ArtifactError> {
    serde_json::to_vec(value).map_err(|source| ArtifactError::Serialization {
        path: PathBuf::from(file),
        source,
    })
}

fn from_json<T: DeserializeOwned>(bytes: &[u8], path: &Path) -> Result<T, ArtifactError> {
    serde_json::from_slice(bytes).map_err(|source| ArtifactError::Serialization {
        path: path.to_path_buf(),
        source,
    })
}

fn load_component<T: DeserializeOwned>(
    dir: &Path,
    file: &str,
    manifest: &BundleManifest,
) -> Result<T, ArtifactError> {
    let path = dir.join(file);
    let bytes = read(&path)?;
    if manifest.checksums.get(file) != Some(&checksum(&bytes)) {
        return Err(ArtifactError::ChecksumMismatch(file.to_string()));
    }
    from_json(&bytes, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::{ForestParams, RandomForest};
    use crate::pipeline::features::VectorizerParams;

    fn fitted_bundle(k: usize) -> ModelBundle {
        let texts = [
            "petition court relief applicant",
            "petition court relief respondent",
            "contract party agreement clause",
            "contract party agreement term",
        ];
        let labels = ["petition", "petition", "contract", "contract"];
        let mut features = FeaturePipeline::new(
            VectorizerParams {
                min_df: 1,
                max_df: 1.0,
                ..VectorizerParams::default()
            },
            k,
        );
        let x = features.fit(&texts, &labels).unwrap();
        let mut classifier = Classifier::RandomForest(RandomForest::new(
            ForestParams {
                n_estimators: 5,
                min_samples_split: 2,
                min_samples_leaf: 1,
                ..ForestParams::default()
            },
            42,
        ));
        classifier.fit(&x, &labels).unwrap();
        ModelBundle::new(features, classifier)
    }

    #[test]
    fn publish_then_load_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let bundle = fitted_bundle(4);
        let manifest = store
            .publish(&bundle, BTreeMap::from([("accuracy".to_string(), 1.0)]))
            .unwrap();

        assert_eq!(manifest.selected_features, 4);
        assert_eq!(manifest.labels, vec!["contract", "petition"]);
        assert_eq!(manifest.checksums.len(), 3);

        let loaded = store.load_current().unwrap();
        assert_eq!(loaded.manifest, manifest);
        assert_eq!(loaded.bundle, bundle);
        assert_eq!(store.list_bundles().unwrap(), vec![manifest.bundle_id.to_string()]);
    }

    #[test]
    fn republishing_moves_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let first = store.publish(&fitted_bundle(3), BTreeMap::new()).unwrap();
        let second = store.publish(&fitted_bundle(4), BTreeMap::new()).unwrap();
        assert_eq!(store.list_bundles().unwrap().len(), 2);
        assert_eq!(
            store.current_id().unwrap(),
            Some(second.bundle_id.to_string())
        );
        assert_ne!(first.bundle_id, second.bundle_id);
        // No staging directories left behind.
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".staging-")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn empty_store_has_no_current_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.list_bundles().unwrap().is_empty());
        assert!(matches!(
            store.load_current(),
            Err(ArtifactError::NoCurrentBundle(_))
        ));
    }

    #[test]
    fn tampered_component_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let manifest = store.publish(&fitted_bundle(4), BTreeMap::new()).unwrap();
        let bundle_dir = dir.path().join(BUNDLES_DIR).join(manifest.bundle_id.to_string());
        fs::write(bundle_dir.join(CLASSIFIER_FILE), b"{}").unwrap();
        assert!(matches!(
            ArtifactStore::load(&bundle_dir),
            Err(ArtifactError::ChecksumMismatch(f)) if f == CLASSIFIER_FILE
        ));
    }

    #[test]
    fn selector_width_disagreeing_with_vocabulary_blocks_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let manifest = store.publish(&fitted_bundle(4), BTreeMap::new()).unwrap();
        let bundle_dir = dir.path().join(BUNDLES_DIR).join(manifest.bundle_id.to_string());

        // A selector fit on a 2-column input, with a manifest checksum to match.
        let mut foreign = Chi2Selector::new(1);
        foreign
            .fit(
                &crate::pipeline::features::FeatureMatrix::from_dense(&[
                    vec![1.0, 0.0],
                    vec![0.0, 1.0],
                ]),
                &["a", "b"],
            )
            .unwrap();
        let bytes = serde_json::to_vec(&foreign).unwrap();
        fs::write(bundle_dir.join(SELECTOR_FILE), &bytes).unwrap();
        let mut patched = manifest.clone();
        patched
            .checksums
            .insert(SELECTOR_FILE.to_string(), checksum(&bytes));
        fs::write(
            bundle_dir.join(MANIFEST_FILE),
            serde_json::to_vec(&patched).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            store.load_current(),
            Err(ArtifactError::DimensionMismatch {
                stage: "selector",
                expected: 2,
                ..
            })
        ));
    }

    #[test]
    fn unfit_bundle_cannot_be_published() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let bundle = ModelBundle::new(
            FeaturePipeline::new(VectorizerParams::default(), 10),
            Classifier::RandomForest(RandomForest::new(ForestParams::default(), 0)),
        );
        assert!(matches!(
            store.publish(&bundle, BTreeMap::new()),
            Err(ArtifactError::NotFit("vectorizer"))
        ));
    }

    #[test]
    fn newer_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut manifest = store.publish(&fitted_bundle(4), BTreeMap::new()).unwrap();
        let bundle_dir = dir.path().join(BUNDLES_DIR).join(manifest.bundle_id.to_string());
        manifest.format_version = FORMAT_VERSION + 1;
        fs::write(
            bundle_dir.join(MANIFEST_FILE),
            serde_json::to_vec(&manifest).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            ArtifactStore::load(&bundle_dir),
            Err(ArtifactError::UnsupportedVersion { .. })
        ));
    }
}
