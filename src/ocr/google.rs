//! Google Document AI engine adapter.
//!
//! Calls a Document AI processor's synchronous `:process` endpoint with
//! each page image and maps token confidences into the uniform result
//! format.
//!
//! Requires GOOGLE_DOCAI_ENDPOINT (the full processor `:process` URL) and
//! GOOGLE_DOCAI_TOKEN (OAuth bearer token) environment variables.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{
    recognition_rate_from_confidences, with_timeout, EngineError, EngineKind, OcrEngine,
};
use super::prepare::PreparedDocument;
use crate::models::EngineResult;

/// Google Document AI via the synchronous process REST endpoint.
pub struct GoogleEngine {
    endpoint: Option<String>,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ProcessRequest {
    #[serde(rename = "rawDocument")]
    raw_document: RawDocument,
}

#[derive(Debug, Serialize)]
struct RawDocument {
    content: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    document: Option<DocaiDocument>,
    error: Option<DocaiError>,
}

#[derive(Debug, Deserialize)]
struct DocaiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct DocaiDocument {
    #[serde(default)]
    text: String,
    #[serde(default)]
    pages: Vec<DocaiPage>,
}

#[derive(Debug, Deserialize)]
struct DocaiPage {
    #[serde(default)]
    tokens: Vec<DocaiToken>,
    #[serde(rename = "detectedLanguages", default)]
    detected_languages: Vec<DocaiLanguage>,
}

#[derive(Debug, Deserialize)]
struct DocaiToken {
    layout: Option<DocaiLayout>,
}

#[derive(Debug, Deserialize)]
struct DocaiLayout {
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DocaiLanguage {
    #[serde(rename = "languageCode")]
    language_code: Option<String>,
}

impl GoogleEngine {
    /// Create a new Google adapter from environment configuration.
    pub fn new() -> Self {
        Self {
            endpoint: std::env::var("GOOGLE_DOCAI_ENDPOINT").ok(),
            token: std::env::var("GOOGLE_DOCAI_TOKEN").ok(),
            client: reqwest::Client::new(),
        }
    }

    /// Set endpoint and token explicitly (tests, non-env composition).
    pub fn with_credentials(
        mut self,
        endpoint: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        self.endpoint = Some(endpoint.into());
        self.token = Some(token.into());
        self
    }

    async fn process_page(&self, page_png: &[u8]) -> Result<DocaiDocument, EngineError> {
        let (endpoint, token) = match (self.endpoint.as_deref(), self.token.as_deref()) {
            (Some(endpoint), Some(token)) => (endpoint, token),
            _ => {
                return Err(EngineError::Auth(
                    "GOOGLE_DOCAI_ENDPOINT / GOOGLE_DOCAI_TOKEN not set".to_string(),
                ))
            }
        };

        let request = ProcessRequest {
            raw_document: RawDocument {
                content: base64::engine::general_purpose::STANDARD.encode(page_png),
                mime_type: "image/png".to_string(),
            },
        };

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => EngineError::Auth(format!("docai rejected credentials: {}", detail)),
                429 => EngineError::RateLimited {
                    retry_after_secs: None,
                },
                400 => EngineError::BadInput(detail),
                _ => EngineError::Network(format!("docai returned {}: {}", status, detail)),
            });
        }

        let parsed: ProcessResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Network(format!("invalid docai response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(EngineError::BadInput(error.message));
        }

        parsed
            .document
            .ok_or_else(|| EngineError::Network("docai response carried no document".to_string()))
    }
}

impl Default for GoogleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for GoogleEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Google
    }

    fn is_available(&self) -> bool {
        self.endpoint.is_some() && self.token.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.is_available() {
            "Google Document AI is available".to_string()
        } else {
            "Set GOOGLE_DOCAI_ENDPOINT and GOOGLE_DOCAI_TOKEN to enable Google Document AI"
                .to_string()
        }
    }

    async fn invoke(
        &self,
        document: &PreparedDocument,
        timeout: Duration,
    ) -> Result<EngineResult, EngineError> {
        let start = Instant::now();

        let documents = with_timeout(timeout, async {
            let mut documents = Vec::with_capacity(document.pages.len());
            for page in &document.pages {
                let bytes = std::fs::read(page)
                    .map_err(|e| EngineError::BadInput(format!("cannot read page: {}", e)))?;
                documents.push(self.process_page(&bytes).await?);
            }
            Ok(documents)
        })
        .await?;

        let mut text = String::new();
        let mut confidences = Vec::new();
        let mut language = None;

        for doc in &documents {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&doc.text);

            for page in &doc.pages {
                confidences.extend(
                    page.tokens
                        .iter()
                        .filter_map(|t| t.layout.as_ref().and_then(|l| l.confidence)),
                );
                if language.is_none() {
                    language = page
                        .detected_languages
                        .iter()
                        .find_map(|l| l.language_code.clone());
                }
            }
        }

        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        debug!(
            pages = document.page_count(),
            tokens = confidences.len(),
            "docai process complete"
        );

        Ok(EngineResult::success(
            EngineKind::Google,
            "Google Document AI",
            text,
            confidence,
            recognition_rate_from_confidences(&confidences),
            document.page_count(),
            start.elapsed().as_secs_f64(),
        )
        .with_language(language))
    }
}
