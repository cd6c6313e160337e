//! External collaborator plumbing shared by the OCR and summarization clients.
//!
//! Both collaborators are plain JSON-over-HTTP services. A `Services` handle is
//! built once from configuration and passed to whatever needs it; dropping the
//! handle releases the underlying HTTP clients.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::ingestion::ocr::{HttpOcrClient, OcrEngine};
use crate::pipeline::summarize::{HttpSummarizer, Summarizer};
use crate::pipeline_config::ServicesConfig;

/// Failure of an external collaborator, surfaced as a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExternalServiceError {
    #[error("{service} service is not reachable at {endpoint}")]
    Connection { service: &'static str, endpoint: String },

    #[error("{service} request timed out after {secs}s")]
    Timeout { service: &'static str, secs: u64 },

    #[error("{service} service returned error (status {status}): {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Malformed {service} response: {reason}")]
    MalformedResponse { service: &'static str, reason: String },

    #[error("{service} service reported: {message}")]
    Reported { service: &'static str, message: String },

    #[error("Invalid {service} request: {reason}")]
    InvalidRequest { service: &'static str, reason: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Build the blocking HTTP client used by both collaborators.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, ExternalServiceError> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExternalServiceError::Client(e.to_string()))
}

/// Classify a transport failure the way callers care about it.
pub fn map_send_error(
    e: reqwest::Error,
    service: &'static str,
    endpoint: &str,
    timeout_secs: u64,
) -> ExternalServiceError {
    if e.is_connect() {
        ExternalServiceError::Connection {
            service,
            endpoint: endpoint.to_string(),
        }
    } else if e.is_timeout() {
        ExternalServiceError::Timeout {
            service,
            secs: timeout_secs,
        }
    } else {
        ExternalServiceError::Client(e.to_string())
    }
}

/// A reported error is only an error when it carries text.
pub fn reported_error(service: &'static str, error: Option<&str>) -> Option<ExternalServiceError> {
    match error.map(str::trim) {
        Some(message) if !message.is_empty() => Some(ExternalServiceError::Reported {
            service,
            message: message.to_string(),
        }),
        _ => None,
    }
}

/// Explicit handle to the configured collaborators.
#[derive(Clone, Default)]
pub struct Services {
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
}

impl Services {
    /// No collaborators: documents that need OCR are skipped.
    pub fn none() -> Self {
        Self::default()
    }

    /// Construct HTTP clients for every endpoint present in configuration.
    pub fn from_config(config: &ServicesConfig) -> Result<Self, ExternalServiceError> {
        let ocr = match &config.ocr_endpoint {
            Some(endpoint) => {
                let client =
                    HttpOcrClient::new(endpoint, config.timeout_secs, config.api_token.clone())?;
                Some(Arc::new(client) as Arc<dyn OcrEngine>)
            }
            None => None,
        };

        let summarizer = match &config.summarize_endpoint {
            Some(endpoint) => {
                let client =
                    HttpSummarizer::new(endpoint, config.timeout_secs, config.api_token.clone())?;
                Some(Arc::new(client) as Arc<dyn Summarizer>)
            }
            None => None,
        };

        tracing::info!(
            ocr = ocr.is_some(),
            summarizer = summarizer.is_some(),
            timeout_secs = config.timeout_secs,
            "External services configured"
        );

        Ok(Self { ocr, summarizer })
    }

    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("ocr", &self.ocr.is_some())
            .field("summarizer", &self.summarizer.is_some())
            .finish()
    }
}
