//! OCR workflow orchestration.
//!
//! Given a document, a primary engine, and an ordered or parallel set of
//! fallbacks, decide which engines to run, judge each result against
//! configurable thresholds, and select a single winner — with retries,
//! timeouts, and a per-engine circuit breaker guarding against cascading
//! failures.

mod breaker;
mod config;
mod coordinator;
mod events;
mod quality;
mod retry;
mod scheduler;
mod selector;

use thiserror::Error;

pub use breaker::{BreakerState, CircuitBreakerStore};
pub use config::{
    CircuitBreakerConfig, EngineConfig, QualityThresholds, QualityWeights, RetryPolicy,
    SelectionStrategy, WorkflowConfig, WorkflowOverrides,
};
pub use coordinator::WorkflowCoordinator;
pub use events::{EventSink, WorkflowEvent};
pub use quality::{QualityChecks, QualityEvaluator, Verdict};
pub use retry::{EngineCall, RetryController};
pub use scheduler::FallbackScheduler;
pub use selector::{select, selected_result, Selection};

/// Workflow-level errors.
///
/// Per-engine failures are recorded in the execution log, never raised;
/// only configuration problems and the terminal absence of any usable
/// result surface here.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("invalid workflow configuration: {0}")]
    InvalidConfig(String),

    #[error("all {attempted} engines failed to produce a result")]
    AllEnginesFailed { attempted: usize },
}
