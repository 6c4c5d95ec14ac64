//! Retry controller wrapping engine invocations.
//!
//! Applies exponential backoff to transient failures and consults the
//! circuit breaker before every attempt. Permanent failures never retry.
//! Backoff sleeps happen on the calling task, so one engine's retries
//! never delay another engine's concurrent attempts.

use std::future::Future;

use tracing::{debug, warn};

use super::breaker::CircuitBreakerStore;
use super::config::{CircuitBreakerConfig, RetryPolicy};
use crate::models::EngineResult;
use crate::ocr::{EngineError, EngineKind};

/// Result of one controlled invocation, with the retries it consumed.
pub struct EngineCall {
    pub result: Result<EngineResult, EngineError>,
    pub retries: u32,
}

/// Controller owning the shared breaker store.
#[derive(Clone)]
pub struct RetryController {
    breakers: CircuitBreakerStore,
}

impl RetryController {
    pub fn new(breakers: CircuitBreakerStore) -> Self {
        Self { breakers }
    }

    pub fn breakers(&self) -> &CircuitBreakerStore {
        &self.breakers
    }

    /// Invoke `f` under the retry policy and the engine's breaker.
    ///
    /// A breaker fast-fail is returned as `CircuitOpen` without invoking
    /// `f` and without counting as a new breaker failure.
    pub async fn call<F, Fut>(
        &self,
        engine: EngineKind,
        policy: &RetryPolicy,
        breaker: &CircuitBreakerConfig,
        f: F,
    ) -> EngineCall
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<EngineResult, EngineError>>,
    {
        if breaker.enabled {
            if let Err(e) = self.breakers.acquire(engine, breaker).await {
                debug!(engine = %engine, "breaker open, failing fast");
                return EngineCall {
                    result: Err(e),
                    retries: 0,
                };
            }
        }

        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(result) => {
                    if breaker.enabled {
                        self.breakers.record_success(engine).await;
                    }
                    return EngineCall {
                        result: Ok(result),
                        retries: attempt,
                    };
                }
                Err(e) => {
                    if breaker.enabled {
                        self.breakers.record_failure(engine, breaker).await;
                    }

                    if !e.is_transient() {
                        debug!(engine = %engine, error = %e, "permanent failure, not retrying");
                        return EngineCall {
                            result: Err(e),
                            retries: attempt,
                        };
                    }
                    if attempt >= policy.max_retries {
                        warn!(
                            engine = %engine,
                            retries = attempt,
                            error = %e,
                            "retries exhausted"
                        );
                        return EngineCall {
                            result: Err(e),
                            retries: attempt,
                        };
                    }

                    let wait = policy.backoff_delay(attempt);
                    debug!(
                        engine = %engine,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;

                    // Failures above may have tripped the breaker (other
                    // executions share it); stop retrying once it opens.
                    if breaker.enabled {
                        if let Err(open) = self.breakers.acquire(engine, breaker).await {
                            return EngineCall {
                                result: Err(open),
                                retries: attempt,
                            };
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms: 1,
            backoff_factor: 1.0,
            max_backoff_secs: 1,
        }
    }

    fn breaker_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            recovery_timeout_secs: 60,
        }
    }

    fn ok_result() -> EngineResult {
        EngineResult::success(
            EngineKind::Tesseract,
            "Tesseract OCR",
            "text".to_string(),
            0.9,
            0.9,
            1,
            0.1,
        )
    }

    #[tokio::test]
    async fn test_transient_failures_retry_until_success() {
        let controller = RetryController::new(CircuitBreakerStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let call = controller
            .call(
                EngineKind::Tesseract,
                &fast_policy(3),
                &breaker_config(10),
                move || {
                    let calls = calls_in.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(EngineError::Network("flaky".to_string()))
                        } else {
                            Ok(ok_result())
                        }
                    }
                },
            )
            .await;

        assert!(call.result.is_ok());
        assert_eq!(call.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_does_not_retry() {
        let controller = RetryController::new(CircuitBreakerStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let call = controller
            .call(
                EngineKind::Azure,
                &fast_policy(5),
                &breaker_config(10),
                move || {
                    let calls = calls_in.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(EngineError::BadInput("corrupt file".to_string()))
                    }
                },
            )
            .await;

        assert!(matches!(call.result, Err(EngineError::BadInput(_))));
        assert_eq!(call.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhaust() {
        let controller = RetryController::new(CircuitBreakerStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let call = controller
            .call(
                EngineKind::Google,
                &fast_policy(2),
                &breaker_config(100),
                move || {
                    let calls = calls_in.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(EngineError::Timeout(Duration::from_secs(1)))
                    }
                },
            )
            .await;

        assert!(matches!(call.result, Err(EngineError::Timeout(_))));
        assert_eq!(call.retries, 2);
        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_without_invoking() {
        let breakers = CircuitBreakerStore::new();
        let cfg = breaker_config(1);
        breakers.record_failure(EngineKind::Mistral, &cfg).await;

        let controller = RetryController::new(breakers);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let call = controller
            .call(EngineKind::Mistral, &fast_policy(3), &cfg, move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(ok_result())
                }
            })
            .await;

        assert!(matches!(call.result, Err(EngineError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_breaker_opening_mid_retry_stops_the_loop() {
        let controller = RetryController::new(CircuitBreakerStore::new());
        let cfg = breaker_config(2);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let call = controller
            .call(EngineKind::Azure, &fast_policy(10), &cfg, move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::Network("down".to_string()))
                }
            })
            .await;

        // Two failures trip the threshold; the loop must stop there
        // rather than burn all ten retries.
        assert!(matches!(call.result, Err(EngineError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_after_breaker_disabled() {
        let controller = RetryController::new(CircuitBreakerStore::new());
        let cfg = CircuitBreakerConfig {
            enabled: false,
            ..Default::default()
        };

        let call = controller
            .call(EngineKind::Tesseract, &fast_policy(0), &cfg, || async {
                Ok(ok_result())
            })
            .await;
        assert!(call.result.is_ok());
    }
}
