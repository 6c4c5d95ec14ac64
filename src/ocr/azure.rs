//! Azure Document Intelligence engine adapter.
//!
//! Submits each page to the prebuilt-layout model and polls the analyze
//! operation until it completes. Word confidences, tables, and key-value
//! pairs are mapped into the uniform result format.
//!
//! Requires AZURE_DI_ENDPOINT and AZURE_DI_KEY environment variables.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{
    recognition_rate_from_confidences, with_timeout, EngineError, EngineKind, OcrEngine,
};
use super::prepare::PreparedDocument;
use crate::models::{EngineResult, ExtractedTable, KeyValuePair};

const API_VERSION: &str = "2023-07-31";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Azure Document Intelligence via the prebuilt-layout REST model.
pub struct AzureEngine {
    endpoint: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest {
    #[serde(rename = "base64Source")]
    base64_source: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeOperation {
    status: String,
    #[serde(rename = "analyzeResult")]
    analyze_result: Option<AnalyzeResult>,
    error: Option<AzureError>,
}

#[derive(Debug, Deserialize)]
struct AzureError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    content: String,
    #[serde(default)]
    pages: Vec<AzurePage>,
    #[serde(default)]
    tables: Vec<AzureTable>,
    #[serde(rename = "keyValuePairs", default)]
    key_value_pairs: Vec<AzureKeyValuePair>,
    #[serde(default)]
    languages: Vec<AzureLanguage>,
}

#[derive(Debug, Deserialize)]
struct AzurePage {
    #[serde(default)]
    words: Vec<AzureWord>,
}

#[derive(Debug, Deserialize)]
struct AzureWord {
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct AzureTable {
    #[serde(rename = "rowCount")]
    row_count: usize,
    #[serde(rename = "columnCount")]
    column_count: usize,
    #[serde(default)]
    cells: Vec<AzureCell>,
}

#[derive(Debug, Deserialize)]
struct AzureCell {
    #[serde(rename = "rowIndex")]
    row_index: usize,
    #[serde(rename = "columnIndex")]
    column_index: usize,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct AzureKeyValuePair {
    key: Option<AzureKvContent>,
    value: Option<AzureKvContent>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AzureKvContent {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct AzureLanguage {
    locale: Option<String>,
}

impl AzureEngine {
    /// Create a new Azure adapter from environment configuration.
    pub fn new() -> Self {
        Self {
            endpoint: std::env::var("AZURE_DI_ENDPOINT")
                .ok()
                .map(|e| e.trim_end_matches('/').to_string()),
            api_key: std::env::var("AZURE_DI_KEY").ok(),
            client: reqwest::Client::new(),
        }
    }

    /// Set endpoint and key explicitly (tests, non-env composition).
    pub fn with_credentials(mut self, endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self.api_key = Some(key.into());
        self
    }

    fn credentials(&self) -> Result<(&str, &str), EngineError> {
        match (self.endpoint.as_deref(), self.api_key.as_deref()) {
            (Some(endpoint), Some(key)) => Ok((endpoint, key)),
            _ => Err(EngineError::Auth(
                "AZURE_DI_ENDPOINT / AZURE_DI_KEY not set".to_string(),
            )),
        }
    }

    /// Submit one page and poll the operation to completion.
    async fn analyze_page(&self, page_png: &[u8]) -> Result<AnalyzeResult, EngineError> {
        let (endpoint, key) = self.credentials()?;
        let url = format!(
            "{}/formrecognizer/documentModels/prebuilt-layout:analyze?api-version={}",
            endpoint, API_VERSION
        );

        let request = AnalyzeRequest {
            base64_source: base64::engine::general_purpose::STANDARD.encode(page_png),
        };

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.text().await.ok()));
        }

        let operation_url = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::Network("analyze response missing operation-location".to_string())
            })?;

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let poll = self
                .client
                .get(&operation_url)
                .header("Ocp-Apim-Subscription-Key", key)
                .send()
                .await
                .map_err(|e| EngineError::Network(e.to_string()))?;

            let status = poll.status();
            if !status.is_success() {
                return Err(classify_status(status, poll.text().await.ok()));
            }

            let operation: AnalyzeOperation = poll
                .json()
                .await
                .map_err(|e| EngineError::Network(format!("invalid analyze response: {}", e)))?;

            match operation.status.as_str() {
                "succeeded" => {
                    return operation.analyze_result.ok_or_else(|| {
                        EngineError::Network("succeeded operation carried no result".to_string())
                    })
                }
                "failed" => {
                    let message = operation
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unspecified analyze failure".to_string());
                    return Err(EngineError::BadInput(message));
                }
                _ => continue,
            }
        }
    }
}

/// Map an HTTP status to the engine error taxonomy.
fn classify_status(status: reqwest::StatusCode, body: Option<String>) -> EngineError {
    let detail = body.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => EngineError::Auth(format!("azure rejected credentials: {}", detail)),
        415 => EngineError::UnsupportedFormat(detail),
        429 => EngineError::RateLimited {
            retry_after_secs: None,
        },
        400 => EngineError::BadInput(detail),
        _ => EngineError::Network(format!("azure returned {}: {}", status, detail)),
    }
}

impl Default for AzureEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for AzureEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Azure
    }

    fn is_available(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.is_available() {
            "Azure Document Intelligence is available".to_string()
        } else {
            "Set AZURE_DI_ENDPOINT and AZURE_DI_KEY to enable Azure Document Intelligence"
                .to_string()
        }
    }

    async fn invoke(
        &self,
        document: &PreparedDocument,
        timeout: Duration,
    ) -> Result<EngineResult, EngineError> {
        let start = Instant::now();

        let results = with_timeout(timeout, async {
            let mut results = Vec::with_capacity(document.pages.len());
            for page in &document.pages {
                let bytes = std::fs::read(page)
                    .map_err(|e| EngineError::BadInput(format!("cannot read page: {}", e)))?;
                results.push(self.analyze_page(&bytes).await?);
            }
            Ok(results)
        })
        .await?;

        let mut text = String::new();
        let mut confidences = Vec::new();
        let mut tables = Vec::new();
        let mut pairs = Vec::new();
        let mut language = None;

        for (page_index, result) in results.iter().enumerate() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&result.content);

            for page in &result.pages {
                confidences.extend(page.words.iter().map(|w| w.confidence));
            }

            for table in &result.tables {
                let mut rows = vec![vec![String::new(); table.column_count]; table.row_count];
                for cell in &table.cells {
                    if let Some(row) = rows.get_mut(cell.row_index) {
                        if let Some(slot) = row.get_mut(cell.column_index) {
                            *slot = cell.content.clone();
                        }
                    }
                }
                tables.push(ExtractedTable {
                    page: page_index as u32 + 1,
                    rows,
                });
            }

            pairs.extend(result.key_value_pairs.iter().filter_map(|kv| {
                let key = kv.key.as_ref()?.content.clone();
                let value = kv
                    .value
                    .as_ref()
                    .map(|v| v.content.clone())
                    .unwrap_or_default();
                Some(KeyValuePair {
                    key,
                    value,
                    confidence: kv.confidence,
                })
            }));

            if language.is_none() {
                language = result.languages.iter().find_map(|l| l.locale.clone());
            }
        }

        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        debug!(
            pages = document.page_count(),
            words = confidences.len(),
            tables = tables.len(),
            "azure analyze complete"
        );

        Ok(EngineResult::success(
            EngineKind::Azure,
            "Azure Document Intelligence",
            text,
            confidence,
            recognition_rate_from_confidences(&confidences),
            document.page_count(),
            start.elapsed().as_secs_f64(),
        )
        .with_tables(tables)
        .with_key_value_pairs(pairs)
        .with_language(language))
    }
}
