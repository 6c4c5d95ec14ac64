//! Test doubles for the engine boundary.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::engine::{EngineError, EngineKind, OcrEngine};
use super::prepare::PreparedDocument;
use crate::models::EngineResult;

/// Scripted engine for scheduler and coordinator tests.
pub struct MockEngine {
    kind: EngineKind,
    confidence: f64,
    word_rate: f64,
    text: String,
    fail_with: Option<EngineError>,
    delay: Duration,
    calls: Arc<AtomicU32>,
}

impl MockEngine {
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            confidence: 0.9,
            word_rate: 0.9,
            text: "mock extracted text".to_string(),
            fail_with: None,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_word_rate(mut self, word_rate: f64) -> Self {
        self.word_rate = word_rate;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn failing(mut self, error: EngineError) -> Self {
        self.fail_with = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared invocation counter.
    pub fn calls(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }
}

#[async_trait]
impl OcrEngine for MockEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        true
    }

    fn availability_hint(&self) -> String {
        "mock engine".to_string()
    }

    async fn invoke(
        &self,
        document: &PreparedDocument,
        _timeout: Duration,
    ) -> Result<EngineResult, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        Ok(EngineResult::success(
            self.kind,
            format!("mock-{}", self.kind),
            self.text.clone(),
            self.confidence,
            self.word_rate,
            document.page_count(),
            self.delay.as_secs_f64(),
        ))
    }
}

/// A small in-memory PNG usable as workflow input without external tools.
pub fn sample_png() -> Vec<u8> {
    use image::{DynamicImage, Rgb, RgbImage};

    let mut img = RgbImage::new(32, 32);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        *pixel = if (x + y) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        };
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
    bytes
}
