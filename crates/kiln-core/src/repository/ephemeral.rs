//! In-memory execution record store, used in local mode and by tests in
//! place of the relational database a deployment would persist to.

use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Execution, ExecutionPatch, ExecutionRepository, RepositoryError};

#[derive(Default)]
pub struct EphemeralExecutionRepository {
    records: DashMap<String, Execution>,
}

impl EphemeralExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for EphemeralExecutionRepository {
    async fn insert(&self, execution: Execution) -> Result<(), RepositoryError> {
        if self.records.contains_key(&execution.id) {
            return Err(RepositoryError::AlreadyExists(execution.id));
        }

        self.records.insert(execution.id.clone(), execution);
        Ok(())
    }

    async fn update(&self, id: &str, patch: ExecutionPatch) -> Result<bool, RepositoryError> {
        let Some(mut record) = self.records.get_mut(id) else {
            return Ok(false);
        };

        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(test_status) = patch.test_status {
            record.test_status = test_status;
        }
        if let Some(compile_ms) = patch.compile_ms {
            record.compile_ms = compile_ms;
        }
        if let Some(runtime_ms) = patch.runtime_ms {
            record.runtime_ms = runtime_ms;
        }
        if let Some(runtime_memory_mb) = patch.runtime_memory_mb {
            record.runtime_memory_mb = runtime_memory_mb;
        }

        record.updated_at = SystemTime::now();
        Ok(true)
    }

    async fn update_status(&self, id: &str, status: &str) -> Result<(), RepositoryError> {
        let Some(mut record) = self.records.get_mut(id) else {
            return Err(RepositoryError::NotFound(id.to_string()));
        };

        record.status = status.to_string();
        record.updated_at = SystemTime::now();
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Execution, RepositoryError> {
        self.records
            .get(id)
            .map(|record| record.clone())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }
}
