//! Fallback scheduling.
//!
//! Drives the engine chain for one execution:
//! PENDING → PRIMARY_RUNNING → (PRIMARY_PASSED | FALLBACKS_RUNNING) →
//! SELECTING, with selection and finalization handled by the coordinator.
//!
//! Sequential mode invokes fallbacks strictly in configured order,
//! stopping early only when `stop_on_success` and a verdict passes.
//! Parallel mode fans fallbacks out in waves of `max_parallel_engines`
//! and joins each wave against the remaining execution deadline. When a
//! parallel wave passes under `stop_on_success`, in-flight calls of that
//! wave always run to completion; only further waves are skipped, so the
//! log reflects every started engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::config::{EngineConfig, WorkflowConfig};
use super::events::{EventSink, WorkflowEvent};
use super::quality::{QualityEvaluator, Verdict};
use super::retry::RetryController;
use super::WorkflowError;
use crate::models::{EngineAttempt, EngineResult};
use crate::ocr::{self, EngineError, EngineRegistry};

/// Schedules engine invocations for one workflow execution.
#[derive(Clone)]
pub struct FallbackScheduler {
    registry: Arc<EngineRegistry>,
    controller: RetryController,
}

impl FallbackScheduler {
    pub fn new(registry: Arc<EngineRegistry>, controller: RetryController) -> Self {
        Self {
            registry,
            controller,
        }
    }

    /// Run the configured engine chain over one document.
    ///
    /// Returns the attempt log in slot order. Every started invocation is
    /// logged, including fast-fails and deadline timeouts; an engine
    /// failure never aborts the chain.
    pub async fn run(
        &self,
        config: Arc<WorkflowConfig>,
        document: Arc<Vec<u8>>,
        events: EventSink,
    ) -> Result<Vec<EngineAttempt>, WorkflowError> {
        let evaluator = Arc::new(QualityEvaluator::new(
            config.weights,
            &config.expected_fields,
        )?);
        let started = Instant::now();
        let budget = config.total_timeout();
        let remaining = move || budget.saturating_sub(started.elapsed());

        debug!(workflow = %config.workflow_id, phase = "primary_running", "scheduling primary engine");
        let primary = self
            .clone()
            .run_slot(
                config.clone(),
                evaluator.clone(),
                document.clone(),
                0,
                config.primary.clone(),
                remaining(),
                events.clone(),
            )
            .await;

        let primary_passed = primary.verdict.passed;
        let mut attempts = vec![primary];

        if config.stop_on_success && primary_passed {
            debug!(workflow = %config.workflow_id, phase = "primary_passed", "primary met quality, skipping fallbacks");
            return Ok(attempts);
        }

        if config.fallbacks.is_empty() {
            return Ok(attempts);
        }

        events
            .send(WorkflowEvent::FallbacksStarted {
                count: config.fallbacks.len(),
                parallel: config.parallel_fallbacks,
            })
            .await;
        debug!(
            workflow = %config.workflow_id,
            phase = "fallbacks_running",
            parallel = config.parallel_fallbacks,
            count = config.fallbacks.len(),
            "scheduling fallback engines"
        );

        if config.parallel_fallbacks {
            self.run_parallel(
                &config,
                &evaluator,
                &document,
                &events,
                &mut attempts,
                remaining,
            )
            .await;
        } else {
            self.run_sequential(
                &config,
                &evaluator,
                &document,
                &events,
                &mut attempts,
                remaining,
            )
            .await;
        }

        attempts.sort_by_key(|a| a.slot);
        Ok(attempts)
    }

    /// Fallbacks strictly in configured order.
    async fn run_sequential(
        &self,
        config: &Arc<WorkflowConfig>,
        evaluator: &Arc<QualityEvaluator>,
        document: &Arc<Vec<u8>>,
        events: &EventSink,
        attempts: &mut Vec<EngineAttempt>,
        remaining: impl Fn() -> Duration,
    ) {
        for (index, fallback) in config.fallbacks.iter().enumerate() {
            let slot = index + 1;
            let left = remaining();
            if left.is_zero() {
                warn!(
                    workflow = %config.workflow_id,
                    "execution deadline reached, skipping remaining fallbacks"
                );
                break;
            }

            let attempt = self
                .clone()
                .run_slot(
                    config.clone(),
                    evaluator.clone(),
                    document.clone(),
                    slot,
                    fallback.clone(),
                    left,
                    events.clone(),
                )
                .await;
            let passed = attempt.verdict.passed;
            attempts.push(attempt);

            if config.stop_on_success && passed {
                debug!(workflow = %config.workflow_id, slot, "fallback met quality, stopping early");
                break;
            }
        }
    }

    /// Fallbacks in waves of `max_parallel_engines`, each wave joined
    /// against the remaining deadline.
    async fn run_parallel(
        &self,
        config: &Arc<WorkflowConfig>,
        evaluator: &Arc<QualityEvaluator>,
        document: &Arc<Vec<u8>>,
        events: &EventSink,
        attempts: &mut Vec<EngineAttempt>,
        remaining: impl Fn() -> Duration,
    ) {
        let slots: Vec<(usize, EngineConfig)> = config
            .fallbacks
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, cfg)| (i + 1, cfg))
            .collect();

        for wave in slots.chunks(config.max_parallel_engines) {
            let left = remaining();
            if left.is_zero() {
                warn!(
                    workflow = %config.workflow_id,
                    "execution deadline reached, skipping remaining fallback waves"
                );
                break;
            }

            let mut set = JoinSet::new();
            for (slot, engine_cfg) in wave.iter().cloned() {
                let scheduler = self.clone();
                let config = config.clone();
                let evaluator = evaluator.clone();
                let document = document.clone();
                let events = events.clone();
                set.spawn(async move {
                    scheduler
                        .run_slot(config, evaluator, document, slot, engine_cfg, left, events)
                        .await
                });
            }

            let mut wave_attempts: Vec<EngineAttempt> = Vec::with_capacity(wave.len());
            let join = async {
                while let Some(joined) = set.join_next().await {
                    if let Ok(attempt) = joined {
                        wave_attempts.push(attempt);
                    }
                }
            };
            if tokio::time::timeout(left, join).await.is_err() {
                // Deadline hit mid-wave: abort stragglers and record them
                // as timed out rather than dropping them silently.
                set.abort_all();
                while set.join_next().await.is_some() {}
                for (slot, engine_cfg) in wave {
                    if wave_attempts.iter().any(|a| a.slot == *slot) {
                        continue;
                    }
                    let error = EngineError::Timeout(left);
                    events
                        .send(WorkflowEvent::EngineFailed {
                            engine: engine_cfg.engine,
                            slot: *slot,
                            error: error.to_string(),
                        })
                        .await;
                    wave_attempts.push(EngineAttempt {
                        slot: *slot,
                        result: EngineResult::failure(
                            engine_cfg.engine,
                            engine_cfg.display_name(),
                            &error,
                            left.as_secs_f64(),
                        ),
                        verdict: Verdict::failed(),
                        retries: 0,
                    });
                }
            }

            let wave_passed = wave_attempts.iter().any(|a| a.verdict.passed);
            attempts.extend(wave_attempts);

            if config.stop_on_success && wave_passed {
                debug!(workflow = %config.workflow_id, "parallel wave met quality, skipping further waves");
                break;
            }
        }
    }

    /// Run one engine slot: prepare input, invoke through the retry
    /// controller, evaluate the result.
    #[allow(clippy::too_many_arguments)]
    async fn run_slot(
        self,
        config: Arc<WorkflowConfig>,
        evaluator: Arc<QualityEvaluator>,
        document: Arc<Vec<u8>>,
        slot: usize,
        engine_cfg: EngineConfig,
        remaining: Duration,
        events: EventSink,
    ) -> EngineAttempt {
        let kind = engine_cfg.engine;
        let name = engine_cfg.display_name();
        let started = Instant::now();

        events
            .send(WorkflowEvent::EngineStarted { engine: kind, slot })
            .await;

        let adapter = match self.registry.get(kind) {
            Ok(adapter) => adapter,
            Err(error) => {
                return self
                    .failed_attempt(slot, kind, &name, error, started, &events)
                    .await;
            }
        };

        // Preparation failures are fatal to this attempt only and happen
        // before the breaker sees anything.
        let options = engine_cfg.preprocess;
        let prepare_input = document.clone();
        let prepared = tokio::task::spawn_blocking(move || ocr::prepare(&prepare_input, &options))
            .await
            .map_err(|e| EngineError::Unavailable(format!("preprocessing worker failed: {}", e)))
            .and_then(|r| r.map_err(EngineError::from));
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                return self
                    .failed_attempt(slot, kind, &name, error, started, &events)
                    .await;
            }
        };

        // Propagate the execution deadline into the per-engine timeout.
        let timeout = engine_cfg.timeout().min(remaining);
        let call = self
            .controller
            .call(
                kind,
                config.retry_for(&engine_cfg),
                &config.breaker,
                || adapter.invoke(&prepared, timeout),
            )
            .await;

        match call.result {
            Ok(result) => {
                let verdict = evaluator.evaluate(&result, config.thresholds_for(&engine_cfg));
                events
                    .send(WorkflowEvent::EngineCompleted {
                        engine: kind,
                        slot,
                        passed: verdict.passed,
                        score: verdict.score,
                        confidence: result.confidence,
                    })
                    .await;
                EngineAttempt {
                    slot,
                    result,
                    verdict,
                    retries: call.retries,
                }
            }
            Err(error) => {
                let mut attempt = self
                    .failed_attempt(slot, kind, &name, error, started, &events)
                    .await;
                attempt.retries = call.retries;
                attempt
            }
        }
    }

    async fn failed_attempt(
        &self,
        slot: usize,
        kind: crate::ocr::EngineKind,
        name: &str,
        error: EngineError,
        started: Instant,
        events: &EventSink,
    ) -> EngineAttempt {
        warn!(engine = %kind, slot, error = %error, "engine attempt failed");
        events
            .send(WorkflowEvent::EngineFailed {
                engine: kind,
                slot,
                error: error.to_string(),
            })
            .await;
        EngineAttempt {
            slot,
            result: EngineResult::failure(kind, name, &error, started.elapsed().as_secs_f64()),
            verdict: Verdict::failed(),
            retries: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::mock::{sample_png, MockEngine};
    use crate::ocr::EngineKind;
    use crate::workflow::breaker::CircuitBreakerStore;
    use crate::workflow::config::{EngineConfig, QualityThresholds};
    use std::sync::atomic::Ordering;

    fn scheduler_with(engines: Vec<MockEngine>) -> FallbackScheduler {
        let mut registry = EngineRegistry::new();
        for engine in engines {
            registry.insert(Arc::new(engine));
        }
        FallbackScheduler::new(
            Arc::new(registry),
            RetryController::new(CircuitBreakerStore::new()),
        )
    }

    fn chain_config(primary: EngineKind, fallbacks: &[EngineKind]) -> WorkflowConfig {
        let mut config = WorkflowConfig::new("test_chain", EngineConfig::new(primary));
        config.fallbacks = fallbacks.iter().map(|k| EngineConfig::new(*k)).collect();
        // Fast retries so failure paths don't slow the suite down.
        config.retry.initial_delay_ms = 1;
        config.retry.max_retries = 0;
        config
    }

    async fn run(scheduler: &FallbackScheduler, config: WorkflowConfig) -> Vec<EngineAttempt> {
        scheduler
            .run(
                Arc::new(config),
                Arc::new(sample_png()),
                EventSink::disabled(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_primary_pass_skips_fallbacks() {
        let fallback = MockEngine::new(EngineKind::Google);
        let fallback_calls = fallback.calls();
        let scheduler = scheduler_with(vec![
            MockEngine::new(EngineKind::Tesseract).with_confidence(0.95),
            fallback,
        ]);

        let attempts = run(
            &scheduler,
            chain_config(EngineKind::Tesseract, &[EngineKind::Google]),
        )
        .await;

        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].verdict.passed);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_passing_fallback() {
        let second = MockEngine::new(EngineKind::Mistral);
        let second_calls = second.calls();
        let scheduler = scheduler_with(vec![
            // Primary produces a result that fails quality.
            MockEngine::new(EngineKind::Tesseract).with_confidence(0.2),
            MockEngine::new(EngineKind::Google).with_confidence(0.95),
            second,
        ]);

        let attempts = run(
            &scheduler,
            chain_config(
                EngineKind::Tesseract,
                &[EngineKind::Google, EngineKind::Mistral],
            ),
        )
        .await;

        // Primary plus the first fallback; the second is never invoked.
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].verdict.passed);
        assert!(attempts[1].verdict.passed);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_parallel_waves_attempt_all_fallbacks() {
        let scheduler = scheduler_with(vec![
            MockEngine::new(EngineKind::Tesseract).with_confidence(0.2),
            MockEngine::new(EngineKind::Google).with_confidence(0.3),
            MockEngine::new(EngineKind::Azure).with_confidence(0.3),
            MockEngine::new(EngineKind::Mistral).with_confidence(0.3),
        ]);

        let mut config = chain_config(
            EngineKind::Tesseract,
            &[EngineKind::Google, EngineKind::Azure, EngineKind::Mistral],
        );
        config.parallel_fallbacks = true;
        config.max_parallel_engines = 2;

        let attempts = run(&scheduler, config).await;

        // None pass, so both waves run: primary + 3 fallbacks.
        assert_eq!(attempts.len(), 4);
        let slots: Vec<usize> = attempts.iter().map(|a| a.slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);
        assert!(attempts.iter().all(|a| !a.verdict.passed));
    }

    #[tokio::test]
    async fn test_parallel_passing_wave_skips_later_waves() {
        let last = MockEngine::new(EngineKind::Mistral);
        let last_calls = last.calls();
        let scheduler = scheduler_with(vec![
            MockEngine::new(EngineKind::Tesseract).with_confidence(0.2),
            MockEngine::new(EngineKind::Google).with_confidence(0.95),
            MockEngine::new(EngineKind::Azure).with_confidence(0.3),
            last,
        ]);

        let mut config = chain_config(
            EngineKind::Tesseract,
            &[EngineKind::Google, EngineKind::Azure, EngineKind::Mistral],
        );
        config.parallel_fallbacks = true;
        config.max_parallel_engines = 2;

        let attempts = run(&scheduler, config).await;

        // First wave (google + azure) completes in full, second never starts.
        assert_eq!(attempts.len(), 3);
        assert_eq!(last_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_engine_does_not_abort_chain() {
        let scheduler = scheduler_with(vec![
            MockEngine::new(EngineKind::Tesseract)
                .failing(EngineError::BadInput("corrupt".to_string())),
            MockEngine::new(EngineKind::Google).with_confidence(0.95),
        ]);

        let attempts = run(
            &scheduler,
            chain_config(EngineKind::Tesseract, &[EngineKind::Google]),
        )
        .await;

        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].result.success);
        assert!(attempts[0].result.error.is_some());
        assert!(attempts[1].verdict.passed);
    }

    #[tokio::test]
    async fn test_unregistered_engine_logged_as_failure() {
        let scheduler = scheduler_with(vec![MockEngine::new(EngineKind::Tesseract)
            .with_confidence(0.2)]);

        let attempts = run(
            &scheduler,
            chain_config(EngineKind::Tesseract, &[EngineKind::Paddle]),
        )
        .await;

        assert_eq!(attempts.len(), 2);
        assert!(!attempts[1].result.success);
        assert!(attempts[1]
            .result
            .error
            .as_deref()
            .unwrap()
            .contains("not built in"));
    }

    #[tokio::test]
    async fn test_deadline_records_stragglers_as_timed_out() {
        let scheduler = scheduler_with(vec![
            MockEngine::new(EngineKind::Tesseract).with_confidence(0.2),
            MockEngine::new(EngineKind::Google).with_delay(Duration::from_secs(30)),
        ]);

        let mut config = chain_config(EngineKind::Tesseract, &[EngineKind::Google]);
        config.parallel_fallbacks = true;
        config.total_timeout_secs = 1;

        let attempts = run(&scheduler, config).await;

        assert_eq!(attempts.len(), 2);
        let straggler = &attempts[1];
        assert!(!straggler.result.success);
        assert!(straggler
            .result
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_per_engine_thresholds_apply() {
        let scheduler = scheduler_with(vec![MockEngine::new(EngineKind::Tesseract)
            .with_confidence(0.5)]);

        let mut config = chain_config(EngineKind::Tesseract, &[]);
        config.primary.thresholds = Some(QualityThresholds {
            min_confidence: 0.4,
            ..Default::default()
        });

        let attempts = run(&scheduler, config).await;
        assert!(attempts[0].verdict.passed);
    }
}
