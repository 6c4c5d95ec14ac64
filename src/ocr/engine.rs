//! OCR engine capability boundary.
//!
//! Every backend — cloud or local — is exposed through the single
//! `OcrEngine` trait: given a prepared document and a timeout, produce an
//! `EngineResult` or fail with a typed error. Adapters never retry
//! internally and never touch shared state; retries and circuit breaking
//! live in the workflow controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::prepare::{PreparedDocument, PreprocessError};
use crate::models::EngineResult;

/// Per-word confidence floor: words at or above this confidence count as
/// reliably recognized when computing the word recognition rate.
pub const WORD_CONFIDENCE_FLOOR: f64 = 0.6;

/// The closed set of supported OCR engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Azure Document Intelligence (cloud).
    Azure,
    /// Google Document AI (cloud).
    Google,
    /// Mistral Document AI (cloud).
    Mistral,
    /// Tesseract OCR via the system binary (local).
    Tesseract,
    /// PaddleOCR via ONNX Runtime (local, feature `ocr-paddle`).
    Paddle,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::Google => "google",
            Self::Mistral => "mistral",
            Self::Tesseract => "tesseract",
            Self::Paddle => "paddle",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "azure" => Some(Self::Azure),
            "google" => Some(Self::Google),
            "mistral" => Some(Self::Mistral),
            "tesseract" => Some(Self::Tesseract),
            "paddle" | "paddleocr" => Some(Self::Paddle),
            _ => None,
        }
    }

    /// All engine kinds, in registry order.
    pub fn all() -> &'static [EngineKind] {
        &[
            Self::Azure,
            Self::Google,
            Self::Mistral,
            Self::Tesseract,
            Self::Paddle,
        ]
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors from OCR engine invocations.
///
/// The transient/permanent split drives the retry controller: transient
/// failures are retried with backoff, permanent ones fail immediately.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("network error: {0}")]
    Network(String),

    #[error("engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("invalid input: {0}")]
    BadInput(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("engine not available: {0}")]
    Unavailable(String),

    #[error("circuit breaker open for {engine}")]
    CircuitOpen { engine: EngineKind },

    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
}

impl EngineError {
    /// Whether the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. }
        )
    }
}

/// Uniform capability every OCR backend must satisfy.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Which engine this adapter wraps.
    fn kind(&self) -> EngineKind;

    /// Whether the backend can run in this process/environment
    /// (credentials present, binary installed, models found).
    fn is_available(&self) -> bool;

    /// What is needed to make this backend available.
    fn availability_hint(&self) -> String;

    /// Run OCR on a prepared document.
    ///
    /// Must return `EngineError::Timeout` rather than block past the
    /// caller-supplied timeout. Must not retry internally.
    async fn invoke(
        &self,
        document: &PreparedDocument,
        timeout: Duration,
    ) -> Result<EngineResult, EngineError>;
}

/// Wrap an adapter's work in the caller-supplied timeout.
///
/// Shared by adapters so the timeout contract is honored uniformly.
pub(crate) async fn with_timeout<F, T>(timeout: Duration, work: F) -> Result<T, EngineError>
where
    F: std::future::Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(timeout)),
    }
}

/// Word recognition rate from per-word confidences: the fraction of words
/// at or above the confidence floor.
pub(crate) fn recognition_rate_from_confidences(confidences: &[f64]) -> f64 {
    if confidences.is_empty() {
        return 0.0;
    }
    let recognized = confidences
        .iter()
        .filter(|c| **c >= WORD_CONFIDENCE_FLOOR)
        .count();
    recognized as f64 / confidences.len() as f64
}

/// Estimated word recognition rate for backends that report no per-word
/// confidence: the fraction of tokens that look like plausible words
/// (at least two alphanumeric characters, or a single-character token).
pub(crate) fn plausible_word_rate(text: &str) -> f64 {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let plausible = tokens
        .iter()
        .filter(|t| {
            let alnum = t.chars().filter(|c| c.is_alphanumeric()).count();
            alnum >= 2 || (alnum == 1 && t.chars().count() == 1)
        })
        .count();
    plausible as f64 / tokens.len() as f64
}

/// Mapping from engine identity to its adapter, resolved at composition
/// time over the closed set of kinds.
pub struct EngineRegistry {
    engines: HashMap<EngineKind, Arc<dyn OcrEngine>>,
}

impl EngineRegistry {
    /// Build the registry with every adapter this build supports.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            engines: HashMap::new(),
        };
        registry.insert(Arc::new(super::azure::AzureEngine::new()));
        registry.insert(Arc::new(super::google::GoogleEngine::new()));
        registry.insert(Arc::new(super::mistral::MistralEngine::new()));
        registry.insert(Arc::new(super::tesseract::TesseractEngine::new()));
        #[cfg(feature = "ocr-paddle")]
        registry.insert(Arc::new(super::paddle_backend::PaddleEngine::new()));
        registry
    }

    /// Empty registry, for assembling a custom engine set.
    pub fn new() -> Self {
        Self {
            engines: HashMap::new(),
        }
    }

    /// Register an adapter, replacing any existing adapter for its kind.
    pub fn insert(&mut self, engine: Arc<dyn OcrEngine>) {
        self.engines.insert(engine.kind(), engine);
    }

    /// Resolve an engine kind to its adapter.
    pub fn get(&self, kind: EngineKind) -> Result<Arc<dyn OcrEngine>, EngineError> {
        self.engines
            .get(&kind)
            .cloned()
            .ok_or_else(|| EngineError::Unavailable(format!("{} is not built in", kind)))
    }

    /// Report availability of every engine kind in this build.
    pub fn availability(&self) -> Vec<(EngineKind, bool, String)> {
        EngineKind::all()
            .iter()
            .map(|kind| match self.engines.get(kind) {
                Some(engine) => (*kind, engine.is_available(), engine.availability_hint()),
                None => (
                    *kind,
                    false,
                    format!("{} support is not compiled into this build", kind),
                ),
            })
            .collect()
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_round_trip() {
        for kind in EngineKind::all() {
            assert_eq!(EngineKind::from_str(kind.as_str()), Some(*kind));
        }
        assert_eq!(EngineKind::from_str("paddleocr"), Some(EngineKind::Paddle));
        assert_eq!(EngineKind::from_str("abbyy"), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::Network("reset".into()).is_transient());
        assert!(EngineError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(EngineError::RateLimited {
            retry_after_secs: Some(2)
        }
        .is_transient());

        assert!(!EngineError::BadInput("garbage".into()).is_transient());
        assert!(!EngineError::Auth("bad key".into()).is_transient());
        assert!(!EngineError::UnsupportedFormat("audio/wav".into()).is_transient());
        assert!(!EngineError::CircuitOpen {
            engine: EngineKind::Azure
        }
        .is_transient());
    }

    #[test]
    fn test_recognition_rate_from_confidences() {
        assert_eq!(recognition_rate_from_confidences(&[]), 0.0);
        let rate = recognition_rate_from_confidences(&[0.9, 0.7, 0.5, 0.3]);
        assert!((rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_plausible_word_rate() {
        assert_eq!(plausible_word_rate(""), 0.0);
        assert_eq!(plausible_word_rate("hello world"), 1.0);
        // Noise tokens drag the rate down.
        let rate = plausible_word_rate("hello ~~ ## world");
        assert!((rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_registry_reports_unregistered_kinds() {
        let registry = EngineRegistry::new();
        let report = registry.availability();
        assert_eq!(report.len(), EngineKind::all().len());
        assert!(report.iter().all(|(_, available, _)| !available));
    }
}
