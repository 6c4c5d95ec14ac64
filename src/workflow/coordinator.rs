//! Workflow coordination.
//!
//! Composes preprocessing, engine invocation, quality evaluation,
//! fallback scheduling, and result selection into one execution per
//! document, then hands the finalized record to the persistence
//! collaborator. Callers always get a structured outcome back — which
//! engines ran, why each passed or failed, and what was selected.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::{WorkflowConfig, WorkflowOverrides};
use super::events::{EventSink, WorkflowEvent};
use super::retry::RetryController;
use super::scheduler::FallbackScheduler;
use super::selector;
use super::WorkflowError;
use crate::models::{ExecutionStatus, WorkflowExecution, WorkflowOutcome};
use crate::ocr::EngineRegistry;
use crate::repository::ExecutionRepository;

/// Coordinates workflow executions and delegates persistence.
pub struct WorkflowCoordinator {
    scheduler: FallbackScheduler,
    repository: Arc<dyn ExecutionRepository>,
}

impl WorkflowCoordinator {
    pub fn new(
        registry: Arc<EngineRegistry>,
        controller: RetryController,
        repository: Arc<dyn ExecutionRepository>,
    ) -> Self {
        Self {
            scheduler: FallbackScheduler::new(registry, controller),
            repository,
        }
    }

    /// Process one document through the workflow.
    ///
    /// Safe to invoke once per document-processing request; repeated
    /// requests for the same document are the caller's concern. Only
    /// configuration errors fail the call itself — engine failures are
    /// recorded in the returned outcome.
    pub async fn process_document(
        &self,
        document_id: &str,
        document: Vec<u8>,
        config: &WorkflowConfig,
        overrides: Option<&WorkflowOverrides>,
        events: Option<mpsc::Sender<WorkflowEvent>>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        // Overrides produce a new config value; the stored default is
        // untouched.
        let config = match overrides {
            Some(overrides) => config.with_overrides(overrides),
            None => config.clone(),
        };
        config.validate()?;
        let config = Arc::new(config);

        let events = match events {
            Some(tx) => EventSink::new(tx),
            None => EventSink::disabled(),
        };

        let execution_id = Uuid::new_v4().to_string();
        let mut execution = WorkflowExecution::new(
            execution_id.clone(),
            document_id,
            config.workflow_id.clone(),
        );

        info!(
            execution = %execution_id,
            document = document_id,
            workflow = %config.workflow_id,
            "workflow execution started"
        );
        events
            .send(WorkflowEvent::ExecutionStarted {
                execution_id: execution_id.clone(),
                document_id: document_id.to_string(),
                workflow_id: config.workflow_id.clone(),
            })
            .await;

        let attempts = self
            .scheduler
            .run(config.clone(), Arc::new(document), events.clone())
            .await?;
        for attempt in attempts {
            execution.record_attempt(attempt);
        }

        // SELECTING: even with zero passing verdicts a best-effort
        // selection may still occur; FAILED only when nothing produced a
        // result at all.
        let selection = selector::select(&execution.attempts, config.selection_strategy);

        let (status, failure) = match &selection {
            Some(_) => (ExecutionStatus::Completed, None),
            None => (
                ExecutionStatus::Failed,
                Some(WorkflowError::AllEnginesFailed {
                    attempted: execution.attempts.len(),
                }),
            ),
        };

        let best_effort = selection.as_ref().is_some_and(|s| s.best_effort);
        execution.finalize(status, selection.as_ref().map(|s| s.index), best_effort);

        let selected = selection
            .as_ref()
            .map(|s| selector::selected_result(&execution.attempts, s));

        if let (Some(selection), Some(result)) = (&selection, &selected) {
            events
                .send(WorkflowEvent::ResultSelected {
                    engine: result.engine,
                    strategy: config.selection_strategy,
                    best_effort: selection.best_effort,
                    confidence: result.confidence,
                })
                .await;
        }

        // Persistence is delegated exactly once, after selection. A
        // failing collaborator is logged and surfaced but does not void
        // the in-memory result.
        let persist_error = match self.repository.save(&execution).await {
            Ok(()) => None,
            Err(e) => {
                warn!(execution = %execution_id, error = %e, "failed to persist execution");
                Some(e.to_string())
            }
        };

        let elapsed = execution.total_time_seconds.unwrap_or_default();
        events
            .send(WorkflowEvent::ExecutionFinalized {
                execution_id: execution_id.clone(),
                status,
                elapsed_seconds: elapsed,
            })
            .await;

        match status {
            ExecutionStatus::Failed => warn!(
                execution = %execution_id,
                attempts = execution.attempts.len(),
                "workflow failed: no engine produced a result"
            ),
            _ => info!(
                execution = %execution_id,
                status = status.as_str(),
                best_effort,
                elapsed_seconds = elapsed,
                "workflow execution finished"
            ),
        }

        Ok(WorkflowOutcome {
            execution_id,
            status,
            selected_engine: selected.as_ref().map(|r| r.engine),
            confidence: selected.as_ref().map(|r| r.confidence),
            extracted_text: selected.map(|r| r.extracted_text),
            best_effort,
            failure,
            persist_error,
            execution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::mock::{sample_png, MockEngine};
    use crate::ocr::{EngineError, EngineKind};
    use crate::repository::InMemoryExecutionRepository;
    use crate::workflow::breaker::CircuitBreakerStore;
    use crate::workflow::config::EngineConfig;
    use std::sync::atomic::Ordering;

    fn coordinator_with(
        engines: Vec<MockEngine>,
    ) -> (WorkflowCoordinator, Arc<InMemoryExecutionRepository>) {
        let mut registry = EngineRegistry::new();
        for engine in engines {
            registry.insert(Arc::new(engine));
        }
        let repository = Arc::new(InMemoryExecutionRepository::new());
        let coordinator = WorkflowCoordinator::new(
            Arc::new(registry),
            RetryController::new(CircuitBreakerStore::new()),
            repository.clone(),
        );
        (coordinator, repository)
    }

    fn config(primary: EngineKind, fallbacks: &[EngineKind]) -> WorkflowConfig {
        let mut config = WorkflowConfig::new("test_workflow", EngineConfig::new(primary));
        config.fallbacks = fallbacks.iter().map(|k| EngineConfig::new(*k)).collect();
        config.retry.max_retries = 0;
        config.retry.initial_delay_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_completed_outcome_carries_selection() {
        let (coordinator, repository) =
            coordinator_with(vec![MockEngine::new(EngineKind::Tesseract)
                .with_confidence(0.95)
                .with_text("hello from tesseract")]);

        let outcome = coordinator
            .process_document(
                "doc-1",
                sample_png(),
                &config(EngineKind::Tesseract, &[]),
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.selected_engine, Some(EngineKind::Tesseract));
        assert_eq!(
            outcome.extracted_text.as_deref(),
            Some("hello from tesseract")
        );
        assert!(!outcome.best_effort);
        assert!(outcome.failure.is_none());
        assert!(outcome.persist_error.is_none());

        // Execution was persisted and matches the outcome's record.
        let stored = repository
            .get(&outcome.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.selected, outcome.execution.selected);
        assert_eq!(stored.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_all_engines_failed_yields_failed_status() {
        let engines = vec![
            MockEngine::new(EngineKind::Tesseract)
                .failing(EngineError::BadInput("corrupt".to_string())),
            MockEngine::new(EngineKind::Google)
                .failing(EngineError::UnsupportedFormat("tiff".to_string())),
        ];
        let tesseract_calls = engines[0].calls();
        let google_calls = engines[1].calls();
        let (coordinator, _) = coordinator_with(engines);

        let outcome = coordinator
            .process_document(
                "doc-2",
                sample_png(),
                &config(EngineKind::Tesseract, &[EngineKind::Google]),
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(matches!(
            outcome.failure,
            Some(WorkflowError::AllEnginesFailed { attempted: 2 })
        ));
        assert!(outcome.selected_engine.is_none());
        assert_eq!(outcome.execution.attempts.len(), 2);
        // Permanent errors never retry.
        assert_eq!(tesseract_calls.load(Ordering::SeqCst), 1);
        assert_eq!(google_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_best_effort_selection_is_marked() {
        let (coordinator, _) = coordinator_with(vec![
            MockEngine::new(EngineKind::Tesseract).with_confidence(0.3),
            MockEngine::new(EngineKind::Google).with_confidence(0.5),
        ]);

        let mut cfg = config(EngineKind::Tesseract, &[EngineKind::Google]);
        cfg.stop_on_success = true;

        let outcome = coordinator
            .process_document("doc-3", sample_png(), &cfg, None, None)
            .await
            .unwrap();

        // Nothing passed quality, but results exist: best-effort pick.
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert!(outcome.best_effort);
        assert_eq!(outcome.selected_engine, Some(EngineKind::Google));
        assert!(outcome.execution.best_effort);
    }

    #[tokio::test]
    async fn test_overrides_apply_without_mutating_default() {
        let (coordinator, _) = coordinator_with(vec![
            MockEngine::new(EngineKind::Tesseract).with_confidence(0.95),
            MockEngine::new(EngineKind::Google).with_confidence(0.99),
        ]);

        let base = config(EngineKind::Tesseract, &[EngineKind::Google]);
        let overrides = WorkflowOverrides {
            stop_on_success: Some(false),
            ..Default::default()
        };

        let outcome = coordinator
            .process_document("doc-4", sample_png(), &base, Some(&overrides), None)
            .await
            .unwrap();

        // With stop_on_success disabled both engines run and the higher
        // confidence fallback wins.
        assert_eq!(outcome.execution.attempts.len(), 2);
        assert_eq!(outcome.selected_engine, Some(EngineKind::Google));
        assert!(base.stop_on_success);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let (coordinator, _) = coordinator_with(vec![MockEngine::new(EngineKind::Tesseract)]);

        let bad = config(EngineKind::Tesseract, &[EngineKind::Tesseract]);
        let err = coordinator
            .process_document("doc-5", sample_png(), &bad, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let (coordinator, _) = coordinator_with(vec![MockEngine::new(EngineKind::Tesseract)
            .with_confidence(0.95)]);

        let (tx, mut rx) = mpsc::channel(32);
        coordinator
            .process_document(
                "doc-6",
                sample_png(),
                &config(EngineKind::Tesseract, &[]),
                None,
                Some(tx),
            )
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(matches!(events[0], WorkflowEvent::ExecutionStarted { .. }));
        assert!(matches!(events[1], WorkflowEvent::EngineStarted { .. }));
        assert!(matches!(events[2], WorkflowEvent::EngineCompleted { .. }));
        assert!(matches!(events[3], WorkflowEvent::ResultSelected { .. }));
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::ExecutionFinalized { .. })
        ));
    }
}
