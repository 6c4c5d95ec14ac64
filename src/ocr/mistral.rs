//! Mistral Document AI engine adapter.
//!
//! Sends each page to the Mistral OCR endpoint as an inline data URL and
//! joins the returned page markdown. Mistral reports no per-word
//! confidence, so the word recognition rate is estimated from token
//! plausibility.
//!
//! Requires the MISTRAL_API_KEY environment variable.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{plausible_word_rate, with_timeout, EngineError, EngineKind, OcrEngine};
use super::prepare::PreparedDocument;
use crate::models::EngineResult;

const OCR_URL: &str = "https://api.mistral.ai/v1/ocr";
const OCR_MODEL: &str = "mistral-ocr-latest";

/// Confidence reported for Mistral results. The API exposes no score, so
/// a fixed prior is used and quality gating leans on the word rate.
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Mistral Document AI via the OCR REST endpoint.
pub struct MistralEngine {
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OcrRequest {
    model: String,
    document: OcrDocument,
}

#[derive(Debug, Serialize)]
struct OcrDocument {
    #[serde(rename = "type")]
    kind: String,
    image_url: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

#[derive(Debug, Deserialize)]
struct OcrPage {
    #[serde(default)]
    markdown: String,
}

impl MistralEngine {
    /// Create a new Mistral adapter from environment configuration.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("MISTRAL_API_KEY").ok(),
            model: OCR_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Set the API key explicitly (tests, non-env composition).
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    async fn ocr_page(&self, page_png: &[u8]) -> Result<String, EngineError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EngineError::Auth("MISTRAL_API_KEY not set".to_string()))?;

        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(page_png)
        );
        let request = OcrRequest {
            model: self.model.clone(),
            document: OcrDocument {
                kind: "image_url".to_string(),
                image_url: data_url,
            },
        };

        let response = self
            .client
            .post(OCR_URL)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let detail = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => EngineError::Auth(format!("mistral rejected credentials: {}", detail)),
                429 => EngineError::RateLimited {
                    retry_after_secs: retry_after,
                },
                400 => EngineError::BadInput(detail),
                _ => EngineError::Network(format!("mistral returned {}: {}", status, detail)),
            });
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Network(format!("invalid mistral response: {}", e)))?;

        Ok(parsed
            .pages
            .into_iter()
            .map(|p| p.markdown)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl Default for MistralEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for MistralEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Mistral
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.is_available() {
            "Mistral Document AI is available".to_string()
        } else {
            "Set MISTRAL_API_KEY to enable Mistral Document AI".to_string()
        }
    }

    async fn invoke(
        &self,
        document: &PreparedDocument,
        timeout: Duration,
    ) -> Result<EngineResult, EngineError> {
        let start = Instant::now();

        let text = with_timeout(timeout, async {
            let mut text = String::new();
            for page in &document.pages {
                let bytes = std::fs::read(page)
                    .map_err(|e| EngineError::BadInput(format!("cannot read page: {}", e)))?;
                let page_text = self.ocr_page(&bytes).await?;
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&page_text);
            }
            Ok(text)
        })
        .await?;

        debug!(
            pages = document.page_count(),
            chars = text.len(),
            "mistral OCR complete"
        );

        let word_rate = plausible_word_rate(&text);

        Ok(EngineResult::success(
            EngineKind::Mistral,
            "Mistral Document AI",
            text,
            DEFAULT_CONFIDENCE,
            word_rate,
            document.page_count(),
            start.elapsed().as_secs_f64(),
        ))
    }
}
