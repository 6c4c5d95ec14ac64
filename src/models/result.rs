//! Engine result models.
//!
//! An `EngineResult` is produced once per adapter invocation and is
//! immutable after creation. Failed invocations still produce a result
//! carrying the error, so the execution log always has exactly one entry
//! per engine attempted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ocr::{EngineError, EngineKind};

/// A table extracted from a document, row-major.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTable {
    /// Page the table was found on (1-based).
    pub page: u32,
    pub rows: Vec<Vec<String>>,
}

/// A key-value pair extracted from a document (form fields, labels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
    /// Extraction confidence for this pair, if the backend reports one.
    pub confidence: Option<f64>,
}

/// Result of one OCR engine invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResult {
    /// Which engine produced this result.
    pub engine: EngineKind,
    /// Human-readable engine name from the configuration.
    pub engine_name: String,
    /// Whether the engine produced a usable result at all.
    pub success: bool,
    /// Full extracted text content.
    pub extracted_text: String,
    /// Overall confidence score (0.0-1.0).
    pub confidence: f64,
    /// Fraction of words the engine considers reliably recognized (0.0-1.0).
    pub word_recognition_rate: f64,
    /// Number of pages processed.
    pub page_count: u32,
    /// Total number of words extracted.
    pub word_count: u32,
    /// Time taken to process the document.
    pub processing_time_seconds: f64,
    /// When processing completed.
    pub processed_at: DateTime<Utc>,
    /// Extracted tables, if the backend detects them.
    pub tables: Vec<ExtractedTable>,
    /// Extracted key-value pairs, if the backend detects them.
    pub key_value_pairs: Vec<KeyValuePair>,
    /// Detected document language, if reported.
    pub language: Option<String>,
    /// Error description when `success` is false.
    pub error: Option<String>,
}

impl EngineResult {
    /// Build a successful result with content fields; extras default empty.
    pub fn success(
        engine: EngineKind,
        engine_name: impl Into<String>,
        extracted_text: String,
        confidence: f64,
        word_recognition_rate: f64,
        page_count: u32,
        processing_time_seconds: f64,
    ) -> Self {
        let word_count = extracted_text.split_whitespace().count() as u32;
        Self {
            engine,
            engine_name: engine_name.into(),
            success: true,
            extracted_text,
            confidence: confidence.clamp(0.0, 1.0),
            word_recognition_rate: word_recognition_rate.clamp(0.0, 1.0),
            page_count,
            word_count,
            processing_time_seconds,
            processed_at: Utc::now(),
            tables: Vec::new(),
            key_value_pairs: Vec::new(),
            language: None,
            error: None,
        }
    }

    /// Build a failure result from an engine error, preserving the error
    /// text for the execution log.
    pub fn failure(
        engine: EngineKind,
        engine_name: impl Into<String>,
        error: &EngineError,
        processing_time_seconds: f64,
    ) -> Self {
        Self {
            engine,
            engine_name: engine_name.into(),
            success: false,
            extracted_text: String::new(),
            confidence: 0.0,
            word_recognition_rate: 0.0,
            page_count: 0,
            word_count: 0,
            processing_time_seconds,
            processed_at: Utc::now(),
            tables: Vec::new(),
            key_value_pairs: Vec::new(),
            language: None,
            error: Some(error.to_string()),
        }
    }

    pub fn with_tables(mut self, tables: Vec<ExtractedTable>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_key_value_pairs(mut self, pairs: Vec<KeyValuePair>) -> Self {
        self.key_value_pairs = pairs;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_counts_words() {
        let result = EngineResult::success(
            EngineKind::Tesseract,
            "Tesseract OCR",
            "three little words".to_string(),
            0.9,
            0.85,
            1,
            1.5,
        );
        assert!(result.success);
        assert_eq!(result.word_count, 3);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_confidence_clamped() {
        let result = EngineResult::success(
            EngineKind::Azure,
            "Azure",
            String::new(),
            1.7,
            -0.2,
            1,
            0.1,
        );
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.word_recognition_rate, 0.0);
    }

    #[test]
    fn test_failure_carries_error() {
        let err = EngineError::BadInput("empty document".to_string());
        let result = EngineResult::failure(EngineKind::Google, "Google Document AI", &err, 0.2);
        assert!(!result.success);
        assert_eq!(result.confidence, 0.0);
        assert!(result.error.as_deref().unwrap().contains("empty document"));
    }
}
