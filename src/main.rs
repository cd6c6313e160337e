//! `lexclass` command line.
//!
//! ```bash
//! lexclass train --config lexclass.json
//! lexclass predict --config lexclass.json --input scans/ --output predictions.csv
//! lexclass evaluate --predictions predictions.csv --labels labels.csv
//! lexclass summarize --config lexclass.json --file filing.pdf
//! ```
//!
//! Results are printed as JSON on stdout; logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use lexclass::config;
use lexclass::pipeline::evaluation::EvaluationError;
use lexclass::pipeline::inference::{evaluate_tables, write_predictions, Predictor};
use lexclass::pipeline::ingestion::{BatchIngestor, DocumentLoader};
use lexclass::pipeline::service::Services;
use lexclass::pipeline::summarize::summarize_document;
use lexclass::pipeline::training::train;
use lexclass::pipeline_config::PipelineConfig;
use lexclass::LexclassError;

/// Legal filing classifier.
#[derive(Parser)]
#[command(name = "lexclass", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train on the configured dataset and publish a model bundle
    Train {
        /// Pipeline config file (JSON); defaults apply when omitted
        #[arg(long, env = config::CONFIG_ENV_VAR)]
        config: Option<PathBuf>,
    },

    /// Classify every file under a directory with the current bundle
    Predict {
        #[arg(long, env = config::CONFIG_ENV_VAR)]
        config: Option<PathBuf>,

        /// Directory of documents to classify
        #[arg(long)]
        input: PathBuf,

        /// Prediction table to write (default: <output_dir>/predictions.csv)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Score a prediction table against a ground-truth table
    Evaluate {
        #[arg(long, env = config::CONFIG_ENV_VAR)]
        config: Option<PathBuf>,

        #[arg(long)]
        predictions: PathBuf,

        #[arg(long)]
        labels: PathBuf,

        /// Compare file names including their extension
        #[arg(long)]
        keep_extension: bool,
    },

    /// Summarize one document through the summarization service
    Summarize {
        #[arg(long, env = config::CONFIG_ENV_VAR)]
        config: Option<PathBuf>,

        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Serialize)]
struct SummaryOutput<'a> {
    file: &'a Path,
    summary: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    lexclass::init_tracing();
    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), LexclassError> {
    match command {
        Command::Train { config } => {
            let config = load_config(config.as_deref())?;
            let services = Services::from_config(&config.services)?;
            print_json(&train(&config, &services)?)
        }

        Command::Predict {
            config,
            input,
            output,
        } => {
            let config = load_config(config.as_deref())?;
            let services = Services::from_config(&config.services)?;
            let predictor = Predictor::load(&config)?;
            let loader = DocumentLoader::from_config(&config.ingestion, &services);
            let ingestor = BatchIngestor::new(loader, &config.ingestion);
            let result = predictor.predict_directory(&input, &ingestor)?;

            let output = output.unwrap_or_else(|| config.paths.output_dir.join("predictions.csv"));
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| LexclassError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            write_predictions(&output, &result.predictions)?;
            print_json(&result)
        }

        Command::Evaluate {
            config,
            predictions,
            labels,
            keep_extension,
        } => {
            let mut evaluation = load_config(config.as_deref())?.evaluation;
            if keep_extension {
                evaluation.drop_extension = false;
            }
            match evaluate_tables(&predictions, &labels, &evaluation) {
                Ok(report) => print_json(&report),
                Err(LexclassError::Evaluation(EvaluationError::NoMatch(diagnostic))) => {
                    // Sampled keys from both sides go to stdout for inspection.
                    print_json(&diagnostic)?;
                    Err(EvaluationError::NoMatch(diagnostic).into())
                }
                Err(e) => Err(e),
            }
        }

        Command::Summarize { config, file } => {
            let config = load_config(config.as_deref())?;
            let services = Services::from_config(&config.services)?;
            let summarizer = services
                .summarizer
                .clone()
                .ok_or(LexclassError::NotConfigured("services.summarize_endpoint"))?;

            let outcome = DocumentLoader::from_config(&config.ingestion, &services).load(&file);
            if outcome.text.trim().is_empty() {
                return Err(LexclassError::NoDocuments(
                    outcome
                        .diagnostic
                        .unwrap_or_else(|| format!("no text extracted from {}", file.display())),
                ));
            }
            let summary = summarize_document(summarizer.as_ref(), &outcome.text)?;
            print_json(&SummaryOutput {
                file: &file,
                summary,
            })
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, LexclassError> {
    match path {
        Some(path) => Ok(PipelineConfig::load(path)?),
        None => {
            let config = PipelineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), LexclassError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
