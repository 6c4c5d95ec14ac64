//! OCR engines and document preprocessing.
//!
//! Engines behind the uniform `OcrEngine` capability:
//! - Azure Document Intelligence (cloud)
//! - Google Document AI (cloud)
//! - Mistral Document AI (cloud)
//! - Tesseract via the system binary (local, default)
//! - PaddleOCR via ONNX Runtime (local, feature: ocr-paddle)
//!
//! Retries, circuit breaking, and quality gating are the workflow layer's
//! responsibility; adapters only turn one prepared document into one
//! result within a timeout.

mod azure;
mod engine;
mod google;
mod mistral;
mod prepare;
mod tesseract;

#[cfg(feature = "ocr-paddle")]
mod paddle_backend;

#[cfg(test)]
pub(crate) mod mock;

pub use azure::AzureEngine;
pub use engine::{EngineError, EngineKind, EngineRegistry, OcrEngine, WORD_CONFIDENCE_FLOOR};
pub use google::GoogleEngine;
pub use mistral::MistralEngine;
pub use prepare::{content_hash, prepare, PreparedDocument, PreprocessError, PreprocessOptions};
pub use tesseract::TesseractEngine;

#[cfg(feature = "ocr-paddle")]
pub use paddle_backend::PaddleEngine;
