pub mod config;
pub mod pipeline;
pub mod pipeline_config;

use std::path::PathBuf;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::pipeline::artifacts::ArtifactError;
use crate::pipeline::classify::ClassifierError;
use crate::pipeline::evaluation::{EvaluationError, TableError};
use crate::pipeline::features::FeatureError;
use crate::pipeline::ingestion::IngestionError;
use crate::pipeline::service::ExternalServiceError;
use crate::pipeline_config::ConfigError;

/// Install the stderr `tracing` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Errors surfaced by the orchestration layer and the CLI.
#[derive(Error, Debug)]
pub enum LexclassError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot serialize output: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No usable documents: {0}")]
    NoDocuments(String),

    #[error("Not configured: {0}")]
    NotConfigured(&'static str),
}
