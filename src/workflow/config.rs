//! Workflow configuration models.
//!
//! A `WorkflowConfig` names a primary engine, an ordered fallback chain,
//! and the policies (quality thresholds, retry, circuit breaker,
//! selection strategy) that drive one workflow execution. Configs are
//! plain values: immutable once an execution starts, loadable from TOML,
//! and overridable per invocation by a shallow merge that produces a new
//! value.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ocr::{EngineKind, PreprocessOptions};
use crate::workflow::WorkflowError;

/// Retry policy for engine invocations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Exponential backoff factor.
    pub backoff_factor: f64,
    /// Ceiling on any single backoff delay.
    pub max_backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_backoff_secs: 300,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for a given attempt:
    /// `min(max_backoff, initial_delay * backoff_factor^attempt)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.initial_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        let max_ms = self.max_backoff_secs.saturating_mul(1000) as f64;
        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }
}

/// Circuit breaker parameters, applied per engine identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long an open breaker fast-fails before admitting a trial call.
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_secs: 300,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Quality thresholds an engine result must meet to pass evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Minimum average confidence (0.0-1.0).
    pub min_confidence: f64,
    /// Minimum word recognition rate (0.0-1.0).
    pub min_word_recognition_rate: f64,
    /// Minimum expected-field detection rate (0.0-1.0).
    pub min_field_detection_rate: f64,
    /// Maximum allowed processing time.
    pub max_processing_seconds: f64,
    /// Minimum number of pages that must be processed.
    pub min_pages: u32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            min_word_recognition_rate: 0.8,
            min_field_detection_rate: 0.6,
            max_processing_seconds: 300.0,
            min_pages: 1,
        }
    }
}

/// Weights for combining check dimensions into one quality score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub confidence: f64,
    pub word_rate: f64,
    pub field_coverage: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            confidence: 1.0,
            word_rate: 1.0,
            field_coverage: 1.0,
        }
    }
}

/// Strategy for selecting the winning result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    HighestConfidence,
    FirstSuccess,
    Consensus,
    WeightedAverage,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighestConfidence => "highest_confidence",
            Self::FirstSuccess => "first_success",
            Self::Consensus => "consensus",
            Self::WeightedAverage => "weighted_average",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "highest_confidence" => Some(Self::HighestConfidence),
            "first_success" => Some(Self::FirstSuccess),
            "consensus" => Some(Self::Consensus),
            "weighted_average" => Some(Self::WeightedAverage),
            _ => None,
        }
    }
}

/// Configuration for one engine in the workflow chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine identity.
    pub engine: EngineKind,
    /// Human-readable name; defaults to the engine identity.
    #[serde(default)]
    pub name: Option<String>,
    /// Per-engine invocation timeout.
    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-engine threshold overrides (falls back to the workflow's).
    #[serde(default)]
    pub thresholds: Option<QualityThresholds>,
    /// Per-engine retry overrides (falls back to the workflow's).
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Preprocessing options for this engine's input.
    #[serde(default)]
    pub preprocess: PreprocessOptions,
}

fn default_engine_timeout_secs() -> u64 {
    300
}

impl EngineConfig {
    pub fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            name: None,
            timeout_secs: default_engine_timeout_secs(),
            thresholds: None,
            retry: None,
            preprocess: PreprocessOptions::default(),
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.engine.as_str().to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Complete configuration for one OCR workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Unique identifier for this workflow configuration.
    pub workflow_id: String,
    /// Human-readable workflow name.
    pub name: String,

    /// Primary engine.
    pub primary: EngineConfig,
    /// Ordered fallback engines.
    #[serde(default)]
    pub fallbacks: Vec<EngineConfig>,

    /// Global quality thresholds (engines may override).
    #[serde(default)]
    pub thresholds: QualityThresholds,
    /// Global retry policy (engines may override).
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Circuit breaker parameters.
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
    /// Quality score weights.
    #[serde(default)]
    pub weights: QualityWeights,
    /// Regex patterns for fields expected in the extracted text. Empty
    /// means the field-coverage check does not apply.
    #[serde(default)]
    pub expected_fields: Vec<String>,

    /// Stop as soon as a result passes quality evaluation.
    #[serde(default = "default_true")]
    pub stop_on_success: bool,
    /// Run fallback engines in parallel waves instead of sequentially.
    #[serde(default)]
    pub parallel_fallbacks: bool,
    /// Concurrency bound for parallel fallback waves.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_engines: usize,

    /// Result selection strategy.
    #[serde(default = "default_strategy")]
    pub selection_strategy: SelectionStrategy,

    /// Deadline for the whole execution.
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_parallel() -> usize {
    3
}

fn default_strategy() -> SelectionStrategy {
    SelectionStrategy::HighestConfidence
}

fn default_total_timeout_secs() -> u64 {
    1800
}

impl WorkflowConfig {
    /// Minimal workflow: one primary engine, defaults everywhere else.
    pub fn new(workflow_id: impl Into<String>, primary: EngineConfig) -> Self {
        let workflow_id = workflow_id.into();
        Self {
            name: workflow_id.clone(),
            workflow_id,
            primary,
            fallbacks: Vec::new(),
            thresholds: QualityThresholds::default(),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            weights: QualityWeights::default(),
            expected_fields: Vec::new(),
            stop_on_success: true,
            parallel_fallbacks: false,
            max_parallel_engines: default_max_parallel(),
            selection_strategy: default_strategy(),
            total_timeout_secs: default_total_timeout_secs(),
        }
    }

    /// Validate the configuration before an execution starts.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self
            .fallbacks
            .iter()
            .any(|f| f.engine == self.primary.engine)
        {
            return Err(WorkflowError::InvalidConfig(format!(
                "fallback engine {} duplicates the primary",
                self.primary.engine
            )));
        }
        let mut seen = Vec::new();
        for fallback in &self.fallbacks {
            if seen.contains(&fallback.engine) {
                return Err(WorkflowError::InvalidConfig(format!(
                    "engine {} appears more than once in the fallback chain",
                    fallback.engine
                )));
            }
            seen.push(fallback.engine);
        }
        if self.max_parallel_engines == 0 {
            return Err(WorkflowError::InvalidConfig(
                "max_parallel_engines must be at least 1".to_string(),
            ));
        }
        for pattern in &self.expected_fields {
            regex::Regex::new(pattern).map_err(|e| {
                WorkflowError::InvalidConfig(format!(
                    "invalid expected-field pattern {:?}: {}",
                    pattern, e
                ))
            })?;
        }
        Ok(())
    }

    /// Produce a new config with the overrides shallow-merged in. The
    /// stored default is never mutated.
    pub fn with_overrides(&self, overrides: &WorkflowOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(stop_on_success) = overrides.stop_on_success {
            merged.stop_on_success = stop_on_success;
        }
        if let Some(parallel_fallbacks) = overrides.parallel_fallbacks {
            merged.parallel_fallbacks = parallel_fallbacks;
        }
        if let Some(max_parallel_engines) = overrides.max_parallel_engines {
            merged.max_parallel_engines = max_parallel_engines;
        }
        if let Some(selection_strategy) = overrides.selection_strategy {
            merged.selection_strategy = selection_strategy;
        }
        if let Some(thresholds) = overrides.thresholds {
            merged.thresholds = thresholds;
        }
        if let Some(retry) = overrides.retry {
            merged.retry = retry;
        }
        if let Some(total_timeout_secs) = overrides.total_timeout_secs {
            merged.total_timeout_secs = total_timeout_secs;
        }
        merged
    }

    /// Effective thresholds for one engine (per-engine override or global).
    pub fn thresholds_for<'a>(&'a self, engine: &'a EngineConfig) -> &'a QualityThresholds {
        engine.thresholds.as_ref().unwrap_or(&self.thresholds)
    }

    /// Effective retry policy for one engine.
    pub fn retry_for<'a>(&'a self, engine: &'a EngineConfig) -> &'a RetryPolicy {
        engine.retry.as_ref().unwrap_or(&self.retry)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }

    /// Load a workflow config from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, WorkflowError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::InvalidConfig(format!("cannot read {:?}: {}", path, e)))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| WorkflowError::InvalidConfig(format!("cannot parse {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, WorkflowError> {
        toml::to_string_pretty(self)
            .map_err(|e| WorkflowError::InvalidConfig(format!("cannot serialize config: {}", e)))
    }

    /// Azure primary with Google and Tesseract fallbacks.
    pub fn azure_primary() -> Self {
        let mut config = Self::new(
            "azure_primary",
            EngineConfig::new(EngineKind::Azure).with_timeout_secs(300),
        );
        config.name = "Azure primary with Google fallback".to_string();
        config.fallbacks = vec![
            EngineConfig::new(EngineKind::Google).with_timeout_secs(300),
            EngineConfig::new(EngineKind::Tesseract).with_timeout_secs(180),
        ];
        config
    }

    /// Google primary with Azure and Tesseract fallbacks.
    pub fn google_primary() -> Self {
        let mut config = Self::new(
            "google_primary",
            EngineConfig::new(EngineKind::Google).with_timeout_secs(300),
        );
        config.name = "Google primary with Azure fallback".to_string();
        config.fallbacks = vec![
            EngineConfig::new(EngineKind::Azure).with_timeout_secs(300),
            EngineConfig::new(EngineKind::Tesseract).with_timeout_secs(180),
        ];
        config
    }

    /// Local engines only.
    pub fn opensource() -> Self {
        let mut config = Self::new(
            "opensource",
            EngineConfig::new(EngineKind::Tesseract).with_timeout_secs(300),
        );
        config.name = "Open source OCR engines".to_string();
        config.fallbacks = vec![EngineConfig::new(EngineKind::Paddle).with_timeout_secs(300)];
        config
    }

    /// Resolve a named preset.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "azure_primary" => Some(Self::azure_primary()),
            "google_primary" => Some(Self::google_primary()),
            "opensource" => Some(Self::opensource()),
            _ => None,
        }
    }
}

/// Per-invocation overrides, shallow-merged over a stored config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowOverrides {
    pub stop_on_success: Option<bool>,
    pub parallel_fallbacks: Option<bool>,
    pub max_parallel_engines: Option<usize>,
    pub selection_strategy: Option<SelectionStrategy>,
    pub thresholds: Option<QualityThresholds>,
    pub retry: Option<RetryPolicy>,
    pub total_timeout_secs: Option<u64>,
}
