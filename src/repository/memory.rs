//! In-memory execution repository for single-process operation.
//!
//! State is not persisted across restarts; used for tests and embedded
//! callers that surface outcomes directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ExecutionRepository, RepositoryError};
use crate::models::WorkflowExecution;

/// In-memory execution store.
#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<HashMap<String, WorkflowExecution>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored executions.
    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let executions = self.executions.read().await;
        Ok(executions.get(execution_id).cloned())
    }

    async fn list_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let executions = self.executions.read().await;
        let mut matching: Vec<WorkflowExecution> = executions
            .values()
            .filter(|e| e.document_id == document_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.started_at);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionStatus;

    #[tokio::test]
    async fn test_save_and_get() {
        let repository = InMemoryExecutionRepository::new();
        let mut execution = WorkflowExecution::new("e1", "d1", "w1");
        execution.finalize(ExecutionStatus::Completed, None, false);

        repository.save(&execution).await.unwrap();

        let loaded = repository.get("e1").await.unwrap().unwrap();
        assert_eq!(loaded.execution_id, "e1");
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert!(repository.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_for_document() {
        let repository = InMemoryExecutionRepository::new();
        repository
            .save(&WorkflowExecution::new("e1", "d1", "w1"))
            .await
            .unwrap();
        repository
            .save(&WorkflowExecution::new("e2", "d2", "w1"))
            .await
            .unwrap();
        repository
            .save(&WorkflowExecution::new("e3", "d1", "w1"))
            .await
            .unwrap();

        let for_d1 = repository.list_for_document("d1").await.unwrap();
        assert_eq!(for_d1.len(), 2);
        assert!(for_d1.iter().all(|e| e.document_id == "d1"));
    }
}
