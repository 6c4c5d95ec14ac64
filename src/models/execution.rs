//! Workflow execution models.
//!
//! A `WorkflowExecution` is the durable record of one workflow run against
//! one document: which engines ran (in configuration-slot order), how each
//! result was judged, and which result won. It is append-only while the
//! workflow runs and read-only after `finalize`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::EngineResult;
use crate::ocr::EngineKind;
use crate::workflow::Verdict;

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One engine invocation recorded in the execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineAttempt {
    /// Configuration-order slot: 0 is the primary, fallbacks follow in
    /// configured order. Slot order is stable even when fallbacks run in
    /// parallel and complete out of order.
    pub slot: usize,
    /// The engine's result (success or failure).
    pub result: EngineResult,
    /// Quality verdict for this result.
    pub verdict: Verdict,
    /// How many retries the controller spent on this invocation.
    pub retries: u32,
}

/// Record of one workflow run against one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique id for this run.
    pub execution_id: String,
    /// Document being processed.
    pub document_id: String,
    /// Workflow configuration id that drove this run.
    pub workflow_id: String,
    pub status: ExecutionStatus,
    /// Engine attempts in slot order.
    pub attempts: Vec<EngineAttempt>,
    /// Index into `attempts` of the selected result, if any.
    pub selected: Option<usize>,
    /// True when no result passed quality and the selector fell back to the
    /// best-scoring candidate.
    pub best_effort: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_time_seconds: Option<f64>,
}

impl WorkflowExecution {
    /// Start a new execution record.
    pub fn new(
        execution_id: impl Into<String>,
        document_id: impl Into<String>,
        workflow_id: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            document_id: document_id.into(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Running,
            attempts: Vec::new(),
            selected: None,
            best_effort: false,
            started_at: Utc::now(),
            completed_at: None,
            total_time_seconds: None,
        }
    }

    /// Append an engine attempt, keeping the log in slot order.
    ///
    /// The record is append-only until finalized; appends after
    /// finalization are a logic error and are dropped with an assertion in
    /// debug builds.
    pub fn record_attempt(&mut self, attempt: EngineAttempt) {
        debug_assert!(self.completed_at.is_none(), "execution already finalized");
        if self.completed_at.is_some() {
            return;
        }
        let pos = self
            .attempts
            .iter()
            .position(|a| a.slot > attempt.slot)
            .unwrap_or(self.attempts.len());
        self.attempts.insert(pos, attempt);
    }

    /// Finalize the record exactly once with its terminal status.
    pub fn finalize(&mut self, status: ExecutionStatus, selected: Option<usize>, best_effort: bool) {
        debug_assert!(self.completed_at.is_none(), "execution already finalized");
        if self.completed_at.is_some() {
            return;
        }
        let now = Utc::now();
        self.status = status;
        self.selected = selected;
        self.best_effort = best_effort;
        self.total_time_seconds = Some(
            (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0,
        );
        self.completed_at = Some(now);
    }

    /// The selected attempt, when one exists.
    pub fn selected_attempt(&self) -> Option<&EngineAttempt> {
        self.selected.and_then(|i| self.attempts.get(i))
    }

    /// Whether any engine produced a usable result.
    pub fn any_result(&self) -> bool {
        self.attempts.iter().any(|a| a.result.success)
    }
}

/// Caller-facing outcome of one workflow run.
///
/// Always returned as a structured value: which engines ran, why each
/// passed or failed, and what was selected (or that nothing qualified).
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Engine whose result was selected, if any.
    pub selected_engine: Option<EngineKind>,
    /// Confidence reported for the selection. Under the weighted-average
    /// strategy this is the combined confidence, not the raw winner's.
    pub confidence: Option<f64>,
    pub extracted_text: Option<String>,
    /// True when selection was best-effort (no result passed quality).
    pub best_effort: bool,
    /// Terminal failure, when no engine produced any result.
    pub failure: Option<crate::workflow::WorkflowError>,
    /// Error from the persistence collaborator, if saving failed
    /// (non-fatal: the in-memory result above still stands).
    pub persist_error: Option<String>,
    /// The full execution record, including the per-engine log.
    pub execution: WorkflowExecution,
}
