//! JSON-file execution repository.
//!
//! One JSON document per execution under a base directory. Writes go
//! through a temp file and rename so readers never observe a partial
//! record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ExecutionRepository, RepositoryError};
use crate::models::WorkflowExecution;

/// File-backed execution store.
pub struct JsonExecutionRepository {
    dir: PathBuf,
}

impl JsonExecutionRepository {
    /// Create a repository rooted at `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", execution_id))
    }

    fn read_execution(path: &Path) -> Result<WorkflowExecution, RepositoryError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl ExecutionRepository for JsonExecutionRepository {
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let path = self.path_for(&execution.execution_id);
        let raw = serde_json::to_string_pretty(execution)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &path)?;

        debug!(execution = %execution.execution_id, path = %path.display(), "execution persisted");
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let path = self.path_for(execution_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::read_execution(&path)?))
    }

    async fn list_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut matching = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let execution = Self::read_execution(&path)?;
            if execution.document_id == document_id {
                matching.push(execution);
            }
        }
        matching.sort_by_key(|e| e.started_at);
        Ok(matching)
    }
}
