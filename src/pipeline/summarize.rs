//! Summarization collaborator.
//!
//! Long documents are summarized piecewise: overlapping chunks cut at
//! sentence ends, one call per chunk, then one call over the joined partial
//! summaries.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::pipeline::service::{http_client, map_send_error, reported_error, ExternalServiceError};

const SERVICE: &str = "summarization";

/// Texts up to this many characters go out in a single call.
pub const SINGLE_PASS_CHARS: usize = 12_000;
const CHUNK_CHARS: usize = 4_000;
const CHUNK_OVERLAP: usize = 500;
/// How far around a cut point to look for a sentence end.
const BOUNDARY_WINDOW: usize = 100;

pub trait Summarizer: Send + Sync {
    fn summarize(&self, text: &str) -> Result<String, ExternalServiceError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SummaryResponse {
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse `{ summary, error? }`; a non-blank `error` wins.
pub fn parse_summary_response(raw: &str) -> Result<String, ExternalServiceError> {
    let parsed: SummaryResponse =
        serde_json::from_str(raw).map_err(|e| ExternalServiceError::MalformedResponse {
            service: SERVICE,
            reason: e.to_string(),
        })?;
    match reported_error(SERVICE, parsed.error.as_deref()) {
        Some(err) => Err(err),
        None => Ok(parsed.summary),
    }
}

fn reject_empty(text: &str) -> Result<&str, ExternalServiceError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ExternalServiceError::InvalidRequest {
            service: SERVICE,
            reason: "no text provided".into(),
        });
    }
    Ok(text)
}

// ═══════════════════════════════════════════════════════════
// HTTP client
// ═══════════════════════════════════════════════════════════

/// Posts `{ text }` and reads `{ summary, error? }`.
pub struct HttpSummarizer {
    endpoint: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct SummaryRequestBody<'a> {
    text: &'a str,
}

impl HttpSummarizer {
    pub fn new(
        endpoint: &str,
        timeout_secs: u64,
        api_token: Option<String>,
    ) -> Result<Self, ExternalServiceError> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: http_client(timeout_secs)?,
            timeout_secs,
            api_token,
        })
    }
}

impl Summarizer for HttpSummarizer {
    fn summarize(&self, text: &str) -> Result<String, ExternalServiceError> {
        let text = reject_empty(text)?;

        let mut builder = self
            .client
            .post(&self.endpoint)
            .json(&SummaryRequestBody { text });
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .map_err(|e| map_send_error(e, SERVICE, &self.endpoint, self.timeout_secs))?;
        let status = response.status();
        let raw = response
            .text()
            .map_err(|e| map_send_error(e, SERVICE, &self.endpoint, self.timeout_secs))?;
        if !status.is_success() {
            return Err(ExternalServiceError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: raw,
            });
        }

        let summary = parse_summary_response(&raw)?;
        tracing::debug!(
            input_length = text.len(),
            summary_length = summary.len(),
            "Summary received"
        );
        Ok(summary)
    }
}

// ═══════════════════════════════════════════════════════════
// Long documents
// ═══════════════════════════════════════════════════════════

/// Split into chunks of about `size` chars, each starting `overlap` chars
/// before the previous one ended. Cuts move to a nearby sentence end.
pub fn split_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            let lo = end.saturating_sub(BOUNDARY_WINDOW).max(start + 1);
            let hi = (end + BOUNDARY_WINDOW).min(chars.len());
            if let Some(boundary) = sentence_end(&chars, lo, hi) {
                end = boundary;
            }
        }

        chunks.push(chars[start..end].iter().collect());
        if end >= chars.len() {
            break;
        }
        start = (start + 1).max(end.saturating_sub(overlap));
    }
    chunks
}

/// Index just past the last sentence-ending char in `chars[lo..hi]`.
fn sentence_end(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    (lo..hi)
        .rev()
        .find(|&i| matches!(chars[i], '.' | '?' | '!' | '\n'))
        .map(|i| i + 1)
}

/// Summarize text of any length through `summarizer`.
pub fn summarize_document(
    summarizer: &dyn Summarizer,
    text: &str,
) -> Result<String, ExternalServiceError> {
    let text = reject_empty(text)?;
    if text.chars().count() <= SINGLE_PASS_CHARS {
        return summarizer.summarize(text);
    }

    let chunks = split_chunks(text, CHUNK_CHARS, CHUNK_OVERLAP);
    tracing::info!(chunks = chunks.len(), "Summarizing long document in parts");

    let mut partials = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let partial = summarizer.summarize(chunk)?;
        if !partial.trim().is_empty() {
            partials.push(partial.trim().to_string());
        }
    }
    if partials.len() == 1 {
        return Ok(partials.remove(0));
    }

    let joined = partials.join("\n\n");
    match summarizer.summarize(&joined) {
        Ok(merged) if !merged.trim().is_empty() => Ok(merged.trim().to_string()),
        Ok(_) => Ok(joined),
        Err(e) => {
            tracing::warn!(error = %e, "Merging partial summaries failed, returning parts");
            Ok(joined)
        }
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Mock summarizer echoing a prefix of its input, optionally failing.
pub struct MockSummarizer {
    prefix_chars: usize,
    error: Option<ExternalServiceError>,
    inputs: Mutex<Vec<usize>>,
}

impl MockSummarizer {
    pub fn new(prefix_chars: usize) -> Self {
        Self {
            prefix_chars,
            error: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ExternalServiceError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(0)
        }
    }

    /// Character length of every input received, in call order.
    pub fn input_lengths(&self) -> Vec<usize> {
        self.inputs.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Summarizer for MockSummarizer {
    fn summarize(&self, text: &str) -> Result<String, ExternalServiceError> {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(text.chars().count());
        }
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        Ok(text.chars().take(self.prefix_chars).collect())
    }
}
