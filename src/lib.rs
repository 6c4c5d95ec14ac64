//! OCRflow - OCR workflow orchestration for document ingestion.
//!
//! Documents (email attachments or direct uploads) are processed through
//! a configured chain of OCR engines: a primary plus ordered or parallel
//! fallbacks, each invocation guarded by retries and a per-engine circuit
//! breaker, each result judged against quality thresholds, and a single
//! winner selected by a configurable strategy.

pub mod cli;
pub mod models;
pub mod ocr;
pub mod repository;
pub mod workflow;
