//! Per-engine circuit breaker state.
//!
//! One keyed store holds breaker state for every engine identity. It is
//! the only mutable state shared across workflow executions, so every
//! transition happens in a single critical section per key: concurrent
//! executions hitting the same engine observe compare-and-update
//! semantics, never read-modify-write races.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::config::CircuitBreakerConfig;
use crate::ocr::{EngineError, EngineKind};

/// Breaker position for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls fast-fail until the recovery window elapses.
    Open,
    /// One trial call is in flight; everyone else fast-fails.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerEntry {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_at: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_at: None,
        }
    }
}

/// Keyed store of circuit breaker state, shared by all executions.
#[derive(Clone, Default)]
pub struct CircuitBreakerStore {
    engines: Arc<RwLock<HashMap<EngineKind, BreakerEntry>>>,
}

impl CircuitBreakerStore {
    pub fn new() -> Self {
        Self {
            engines: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check whether a call to this engine may proceed.
    ///
    /// Open breakers fail fast with `CircuitOpen` until the recovery
    /// window elapses, at which point exactly one caller is admitted as
    /// the half-open trial. The trial's success or failure decides
    /// whether the breaker closes or reopens.
    pub async fn acquire(
        &self,
        engine: EngineKind,
        config: &CircuitBreakerConfig,
    ) -> Result<(), EngineError> {
        let mut engines = self.engines.write().await;
        let entry = engines.entry(engine).or_insert_with(BreakerEntry::new);

        match entry.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = entry.opened_at.map(|t| t.elapsed());
                if elapsed.is_some_and(|e| e >= config.recovery_timeout()) {
                    debug!(engine = %engine, "breaker half-open, admitting trial call");
                    entry.state = BreakerState::HalfOpen;
                    entry.half_open_at = Some(Instant::now());
                    Ok(())
                } else {
                    Err(EngineError::CircuitOpen { engine })
                }
            }
            BreakerState::HalfOpen => {
                // A trial abandoned by a cancelled caller must not wedge
                // the breaker: admit a new trial after a full window.
                let stale = entry
                    .half_open_at
                    .is_some_and(|t| t.elapsed() >= config.recovery_timeout());
                if stale {
                    entry.half_open_at = Some(Instant::now());
                    Ok(())
                } else {
                    Err(EngineError::CircuitOpen { engine })
                }
            }
        }
    }

    /// Record a successful invocation: reset the counter, close the
    /// breaker.
    pub async fn record_success(&self, engine: EngineKind) {
        let mut engines = self.engines.write().await;
        let entry = engines.entry(engine).or_insert_with(BreakerEntry::new);
        if entry.state != BreakerState::Closed {
            debug!(engine = %engine, "breaker closed after successful call");
        }
        entry.state = BreakerState::Closed;
        entry.consecutive_failures = 0;
        entry.opened_at = None;
        entry.half_open_at = None;
    }

    /// Record a failed invocation: bump the counter, open the breaker at
    /// the threshold; a failed half-open trial reopens immediately.
    pub async fn record_failure(&self, engine: EngineKind, config: &CircuitBreakerConfig) {
        let mut engines = self.engines.write().await;
        let entry = engines.entry(engine).or_insert_with(BreakerEntry::new);

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);

        let reopen = entry.state == BreakerState::HalfOpen
            || (entry.state == BreakerState::Closed
                && entry.consecutive_failures >= config.failure_threshold);
        if reopen {
            warn!(
                engine = %engine,
                failures = entry.consecutive_failures,
                "circuit breaker open for {}s",
                config.recovery_timeout_secs
            );
            entry.state = BreakerState::Open;
            entry.opened_at = Some(Instant::now());
            entry.half_open_at = None;
        }
    }

    /// Current state and failure count for one engine.
    pub async fn state(&self, engine: EngineKind) -> (BreakerState, u32) {
        let engines = self.engines.read().await;
        engines
            .get(&engine)
            .map(|e| (e.state, e.consecutive_failures))
            .unwrap_or((BreakerState::Closed, 0))
    }
}
