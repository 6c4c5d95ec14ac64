//! Tesseract OCR engine adapter.
//!
//! Runs the system `tesseract` binary per page with TSV output so word
//! confidences are available for quality evaluation. This is the
//! traditional, widely-available local option.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use super::engine::{
    recognition_rate_from_confidences, with_timeout, EngineError, EngineKind, OcrEngine,
};
use super::prepare::PreparedDocument;
use crate::models::EngineResult;

/// Tesseract OCR via the command-line binary.
pub struct TesseractEngine {
    language: String,
}

/// One word row parsed from Tesseract TSV output.
struct TsvWord {
    line_key: (u32, u32, u32),
    confidence: f64,
    text: String,
}

impl TesseractEngine {
    /// Create a new Tesseract adapter with the default language.
    pub fn new() -> Self {
        Self {
            language: "eng".to_string(),
        }
    }

    /// Set the OCR language (e.g. "eng", "deu").
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Run Tesseract on one page image, returning (text, word confidences).
    async fn ocr_page(&self, image_path: &Path) -> Result<(String, Vec<f64>), EngineError> {
        let output = tokio::process::Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .arg("tsv")
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::Unavailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ))
            }
            Err(e) => return Err(EngineError::Network(e.to_string())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::BadInput(format!(
                "tesseract failed: {}",
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        Ok(Self::parse_tsv(&tsv))
    }

    /// Parse Tesseract TSV output into reconstructed text plus per-word
    /// confidences.
    ///
    /// Word rows are level 5; columns are
    /// level page block par line word left top width height conf text.
    fn parse_tsv(tsv: &str) -> (String, Vec<f64>) {
        let mut words = Vec::new();
        for row in tsv.lines().skip(1) {
            let cols: Vec<&str> = row.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                continue;
            }
            let text = cols[11].trim();
            if text.is_empty() {
                continue;
            }
            let confidence = cols[10].parse::<f64>().unwrap_or(-1.0);
            if confidence < 0.0 {
                continue;
            }
            let key = (
                cols[2].parse().unwrap_or(0),
                cols[3].parse().unwrap_or(0),
                cols[4].parse().unwrap_or(0),
            );
            words.push(TsvWord {
                line_key: key,
                confidence: confidence / 100.0,
                text: text.to_string(),
            });
        }

        let mut text = String::new();
        let mut confidences = Vec::with_capacity(words.len());
        let mut current_line: Option<(u32, u32, u32)> = None;
        for word in words {
            match current_line {
                Some(key) if key == word.line_key => text.push(' '),
                Some(_) => text.push('\n'),
                None => {}
            }
            current_line = Some(word.line_key);
            text.push_str(&word.text);
            confidences.push(word.confidence);
        }

        (text, confidences)
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tesseract
    }

    fn is_available(&self) -> bool {
        which::which("tesseract").is_ok()
    }

    fn availability_hint(&self) -> String {
        if which::which("tesseract").is_err() {
            "tesseract not installed. Install with: apt install tesseract-ocr".to_string()
        } else {
            "Tesseract is available".to_string()
        }
    }

    async fn invoke(
        &self,
        document: &PreparedDocument,
        timeout: Duration,
    ) -> Result<EngineResult, EngineError> {
        let start = Instant::now();

        let (text, confidences) = with_timeout(timeout, async {
            let mut text = String::new();
            let mut confidences = Vec::new();
            for page in &document.pages {
                let (page_text, page_confidences) = self.ocr_page(page).await?;
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&page_text);
                confidences.extend(page_confidences);
            }
            Ok((text, confidences))
        })
        .await?;

        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        debug!(
            pages = document.page_count(),
            words = confidences.len(),
            confidence,
            "tesseract OCR complete"
        );

        Ok(EngineResult::success(
            EngineKind::Tesseract,
            "Tesseract OCR",
            text,
            confidence,
            recognition_rate_from_confidences(&confidences),
            document.page_count(),
            start.elapsed().as_secs_f64(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t\n\
5\t1\t1\t1\t1\t1\t0\t0\t20\t10\t96.5\tHello\n\
5\t1\t1\t1\t1\t2\t22\t0\t20\t10\t91.0\tworld\n\
5\t1\t1\t1\t2\t1\t0\t12\t20\t10\t40.0\tsmudge\n";

    #[test]
    fn test_parse_tsv_reconstructs_lines() {
        let (text, confidences) = TesseractEngine::parse_tsv(SAMPLE_TSV);
        assert_eq!(text, "Hello world\nsmudge");
        assert_eq!(confidences.len(), 3);
        assert!((confidences[0] - 0.965).abs() < 1e-9);
    }

    #[test]
    fn test_parse_tsv_skips_non_word_rows() {
        let (text, confidences) =
            TesseractEngine::parse_tsv("header\n1\t1\t0\t0\t0\t0\t0\t0\t1\t1\t-1\t\n");
        assert!(text.is_empty());
        assert!(confidences.is_empty());
    }
}
