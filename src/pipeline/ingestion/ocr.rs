//! OCR collaborator boundary.
//!
//! The engine always answers with an `OcrResponse`; transport and service
//! failures are carried in its `error` field rather than raised.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::pipeline::service::{http_client, map_send_error, reported_error, ExternalServiceError};

const SERVICE: &str = "ocr";

/// One page or image submitted for recognition.
#[derive(Debug, Clone, Copy)]
pub struct OcrRequest<'a> {
    pub source: &'a Path,
    /// 0-based page index for page documents, `None` for standalone images.
    pub page: Option<usize>,
    pub mime_type: &'a str,
    pub bytes: &'a [u8],
}

impl OcrRequest<'_> {
    /// Name sent to the service, `<file>#page<N>` for rendered pages.
    pub fn display_name(&self) -> String {
        let file = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self.page {
            Some(page) => format!("{file}#page{}", page + 1),
            None => file,
        }
    }
}

/// Recognition result as reported by the collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OcrResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OcrResponse {
    pub fn failed(error: &ExternalServiceError) -> Self {
        Self {
            text: String::new(),
            method: String::new(),
            error: Some(error.to_string()),
        }
    }

    /// Text on success, the reported error otherwise.
    pub fn into_text(self) -> Result<String, ExternalServiceError> {
        match reported_error(SERVICE, self.error.as_deref()) {
            Some(err) => Err(err),
            None => Ok(self.text),
        }
    }
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, request: &OcrRequest<'_>) -> OcrResponse;
}

// ═══════════════════════════════════════════════════════════
// HTTP client
// ═══════════════════════════════════════════════════════════

/// Posts `{ image_base64, filename }` and reads `{ text, method, error? }`.
pub struct HttpOcrClient {
    endpoint: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct OcrRequestBody<'a> {
    image_base64: String,
    filename: String,
    mime_type: &'a str,
}

impl HttpOcrClient {
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

    fn send(&self, request: &OcrRequest<'_>) -> Result<OcrResponse, ExternalServiceError> {
        let body = OcrRequestBody {
            image_base64: STANDARD.encode(request.bytes),
            filename: request.display_name(),
            mime_type: request.mime_type,
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
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

        parse_ocr_response(&raw)
    }
}

/// Parse the collaborator's JSON body.
pub fn parse_ocr_response(raw: &str) -> Result<OcrResponse, ExternalServiceError> {
    serde_json::from_str(raw).map_err(|e| ExternalServiceError::MalformedResponse {
        service: SERVICE,
        reason: e.to_string(),
    })
}

impl OcrEngine for HttpOcrClient {
    fn recognize(&self, request: &OcrRequest<'_>) -> OcrResponse {
        match self.send(request) {
            Ok(response) => {
                tracing::debug!(
                    file = %request.display_name(),
                    method = %response.method,
                    text_length = response.text.len(),
                    "OCR response received"
                );
                response
            }
            Err(e) => {
                tracing::warn!(file = %request.display_name(), error = %e, "OCR request failed");
                OcrResponse::failed(&e)
            }
        }
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Mock OCR engine returning a fixed text, optionally slow or failing.
pub struct MockOcrEngine {
    text: String,
    error: Option<String>,
    failing_page: Option<usize>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockOcrEngine {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            error: None,
            failing_page: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call reports this error.
    pub fn failing(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new("")
        }
    }

    /// Only the given 0-based page reports an error.
    pub fn failing_on_page(mut self, page: usize) -> Self {
        self.failing_page = Some(page);
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(&self, request: &OcrRequest<'_>) -> OcrResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let page_failed = self.failing_page.is_some() && self.failing_page == request.page;
        if let Some(error) = &self.error {
            return OcrResponse {
                error: Some(error.clone()),
                ..OcrResponse::default()
            };
        }
        if page_failed {
            return OcrResponse {
                error: Some(format!("page {} unreadable", request.display_name())),
                ..OcrResponse::default()
            };
        }

        OcrResponse {
            text: self.text.clone(),
            method: "mock".into(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(page: Option<usize>) -> OcrRequest<'static> {
        OcrRequest {
            source: Path::new("/scans/affidavit.pdf"),
            page,
            mime_type: "image/png",
            bytes: b"fake_image_bytes",
        }
    }

    #[test]
    fn display_name_includes_page() {
        assert_eq!(request(Some(0)).display_name(), "affidavit.pdf#page1");
        assert_eq!(request(None).display_name(), "affidavit.pdf");
    }

    #[test]
    fn mock_returns_configured_text() {
        let engine = MockOcrEngine::new("Sworn before me this day");
        let text = engine.recognize(&request(None)).into_text().unwrap();
        assert_eq!(text, "Sworn before me this day");
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn mock_failure_is_reported_error() {
        let engine = MockOcrEngine::failing("quota exceeded");
        let err = engine.recognize(&request(None)).into_text().unwrap_err();
        assert!(matches!(err, ExternalServiceError::Reported { service: "ocr", .. }));
    }

    #[test]
    fn mock_fails_only_selected_page() {
        let engine = MockOcrEngine::new("text").failing_on_page(1);
        assert!(engine.recognize(&request(Some(0))).into_text().is_ok());
        assert!(engine.recognize(&request(Some(1))).into_text().is_err());
        assert!(engine.recognize(&request(None)).into_text().is_ok());
    }

    #[test]
    fn parse_response_without_error_field() {
        let parsed = parse_ocr_response(r#"{"text":"ORDER","method":"vision"}"#).unwrap();
        assert_eq!(parsed.text, "ORDER");
        assert_eq!(parsed.method, "vision");
        assert!(parsed.error.is_none());
    }

    #[test]
    fn parse_response_with_empty_error_is_success() {
        let parsed = parse_ocr_response(r#"{"text":"ORDER","method":"vision","error":""}"#)
            .unwrap();
        assert_eq!(parsed.into_text().unwrap(), "ORDER");
    }

    #[test]
    fn parse_malformed_response() {
        let err = parse_ocr_response("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ExternalServiceError::MalformedResponse { .. }));
    }

    #[test]
    fn failed_response_carries_error_text() {
        let response = OcrResponse::failed(&ExternalServiceError::Timeout {
            service: "ocr",
            secs: 5,
        });
        assert!(response.text.is_empty());
        assert!(response.error.unwrap().contains("timed out"));
    }

    #[test]
    fn unreachable_endpoint_yields_error_response() {
        // Port 9 (discard) is closed on test hosts; connection is refused quickly.
        let client = HttpOcrClient::new("http://127.0.0.1:9/ocr", 2, None).unwrap();
        let response = client.recognize(&request(None));
        assert!(response.error.is_some());
        assert!(response.into_text().is_err());
    }
}
