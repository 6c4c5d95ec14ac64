//! Execution persistence collaborators.
//!
//! The orchestrator hands each finalized `WorkflowExecution` to an
//! `ExecutionRepository` exactly once, after selection. Implementations
//! own durability; the orchestrator only depends on the trait.

mod json;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::WorkflowExecution;

pub use json::JsonExecutionRepository;
pub use memory::InMemoryExecutionRepository;

/// Errors from persistence backends.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable storage for workflow executions.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Store a finalized execution (idempotent per execution id).
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError>;

    /// Load one execution by id.
    async fn get(&self, execution_id: &str) -> Result<Option<WorkflowExecution>, RepositoryError>;

    /// All executions recorded for a document, oldest first.
    async fn list_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError>;
}
