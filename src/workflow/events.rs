//! Workflow progress events.
//!
//! The coordinator emits events over an optional mpsc channel so front
//! ends can track progress without the workflow layer knowing about UI
//! concerns.

use tokio::sync::mpsc;

use super::config::SelectionStrategy;
use crate::models::ExecutionStatus;
use crate::ocr::EngineKind;

/// Events emitted during a workflow execution.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// Execution created, primary engine about to run.
    ExecutionStarted {
        execution_id: String,
        document_id: String,
        workflow_id: String,
    },
    /// An engine invocation started.
    EngineStarted { engine: EngineKind, slot: usize },
    /// An engine produced a result and it was evaluated.
    EngineCompleted {
        engine: EngineKind,
        slot: usize,
        passed: bool,
        score: f64,
        confidence: f64,
    },
    /// An engine invocation failed outright.
    EngineFailed {
        engine: EngineKind,
        slot: usize,
        error: String,
    },
    /// Fallback phase entered.
    FallbacksStarted { count: usize, parallel: bool },
    /// A result was selected.
    ResultSelected {
        engine: EngineKind,
        strategy: SelectionStrategy,
        best_effort: bool,
        confidence: f64,
    },
    /// Execution finalized.
    ExecutionFinalized {
        execution_id: String,
        status: ExecutionStatus,
        elapsed_seconds: f64,
    },
}

/// Fire-and-forget event sender; a missing or closed channel is ignored.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<WorkflowEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<WorkflowEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn send(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}
