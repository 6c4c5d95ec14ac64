//! PaddleOCR engine adapter (feature `ocr-paddle`).
//!
//! Uses paddle-ocr-rs for OCR via ONNX Runtime. Model files are located
//! via the OCRFLOW_PADDLE_MODELS directory (detection, classification,
//! recognition ONNX models).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use paddle_ocr_rs::ocr_lite::OcrLite;

use super::engine::{plausible_word_rate, with_timeout, EngineError, EngineKind, OcrEngine};
use super::prepare::PreparedDocument;
use crate::models::EngineResult;

const DET_MODEL_NAME: &str = "ch_PP-OCRv4_det_infer.onnx";
const REC_MODEL_NAME: &str = "ch_PP-OCRv4_rec_infer.onnx";
const CLS_MODEL_NAME: &str = "ch_ppocr_mobile_v2.0_cls_infer.onnx";

/// Confidence prior for Paddle results; the detect API exposes block text
/// without usable scores.
const DEFAULT_CONFIDENCE: f64 = 0.75;

/// Global cached OcrLite instance (initialized once, reused for all OCR
/// calls). Wrapped in Mutex since detection needs `&mut self`.
static OCR_ENGINE: OnceLock<Mutex<OcrLite>> = OnceLock::new();

/// PaddleOCR via ONNX Runtime.
pub struct PaddleEngine {
    model_dir: Option<PathBuf>,
}

impl PaddleEngine {
    /// Create a new Paddle adapter from environment configuration.
    pub fn new() -> Self {
        Self {
            model_dir: std::env::var("OCRFLOW_PADDLE_MODELS").ok().map(PathBuf::from),
        }
    }

    /// Set the model directory explicitly.
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    fn find_models(&self) -> Result<(PathBuf, PathBuf, PathBuf), EngineError> {
        let dir = self.model_dir.as_ref().ok_or_else(|| {
            EngineError::Unavailable("OCRFLOW_PADDLE_MODELS not set".to_string())
        })?;
        let det = dir.join(DET_MODEL_NAME);
        let rec = dir.join(REC_MODEL_NAME);
        let cls = dir.join(CLS_MODEL_NAME);
        if det.exists() && rec.exists() {
            Ok((det, cls, rec))
        } else {
            Err(EngineError::Unavailable(format!(
                "PaddleOCR models not found under {:?}",
                dir
            )))
        }
    }

    fn get_or_init_engine(&self) -> Result<&'static Mutex<OcrLite>, EngineError> {
        if let Some(engine) = OCR_ENGINE.get() {
            return Ok(engine);
        }

        let (det, cls, rec) = self.find_models()?;
        let mut ocr = OcrLite::new();
        ocr.init_models(
            &det.to_string_lossy(),
            &cls.to_string_lossy(),
            &rec.to_string_lossy(),
            4,
        )
        .map_err(|e| EngineError::Unavailable(format!("failed to init PaddleOCR: {}", e)))?;

        // If another thread beat us to initialization, keep theirs.
        let _ = OCR_ENGINE.set(Mutex::new(ocr));
        OCR_ENGINE
            .get()
            .ok_or_else(|| EngineError::Unavailable("failed to cache OCR engine".to_string()))
    }

    fn run_paddle(&self, image_path: &Path) -> Result<String, EngineError> {
        let engine_mutex = self.get_or_init_engine()?;
        let mut ocr = engine_mutex
            .lock()
            .map_err(|e| EngineError::Unavailable(format!("failed to lock OCR engine: {}", e)))?;

        let result = ocr
            .detect_from_path(
                &image_path.to_string_lossy(),
                50,    // padding
                1024,  // max side length
                0.5,   // box score threshold
                0.3,   // unclip ratio
                1.6,   // box threshold
                false, // do angle
                false, // most angle
            )
            .map_err(|e| EngineError::BadInput(format!("PaddleOCR detection failed: {}", e)))?;

        let texts: Vec<String> = result
            .text_blocks
            .iter()
            .map(|block| block.text.clone())
            .collect();
        Ok(texts.join("\n"))
    }
}

impl Default for PaddleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for PaddleEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Paddle
    }

    fn is_available(&self) -> bool {
        self.find_models().is_ok()
    }

    fn availability_hint(&self) -> String {
        match self.find_models() {
            Ok((det, _, _)) => format!("PaddleOCR models found at {:?}", det.parent().unwrap_or(Path::new("."))),
            Err(e) => format!("{} (set OCRFLOW_PADDLE_MODELS)", e),
        }
    }

    async fn invoke(
        &self,
        document: &PreparedDocument,
        timeout: Duration,
    ) -> Result<EngineResult, EngineError> {
        let start = Instant::now();

        let pages = document.pages.clone();
        let model_dir = self.model_dir.clone();
        let text = with_timeout(timeout, async move {
            // ONNX inference is CPU-bound; keep it off the async executor.
            tokio::task::spawn_blocking(move || {
                let engine = PaddleEngine { model_dir };
                let mut text = String::new();
                for page in &pages {
                    let page_text = engine.run_paddle(page)?;
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&page_text);
                }
                Ok(text)
            })
            .await
            .map_err(|e| EngineError::Unavailable(format!("paddle worker failed: {}", e)))?
        })
        .await?;

        let word_rate = plausible_word_rate(&text);

        Ok(EngineResult::success(
            EngineKind::Paddle,
            "PaddleOCR",
            text,
            DEFAULT_CONFIDENCE,
            word_rate,
            document.page_count(),
            start.elapsed().as_secs_f64(),
        ))
    }
}
