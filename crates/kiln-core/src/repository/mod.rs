//! Execution record store.
//!
//! One record per request id tracks the execution from submission through
//! artifact persistence: the status string, the test verdict and the
//! resource numbers reported back to callers. The store is only ever
//! touched through single-statement updates; nothing in the pipeline spans
//! a transaction.

pub mod ephemeral;

use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;

pub use ephemeral::EphemeralExecutionRepository;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("execution record {0} does not exist")]
    NotFound(String),

    #[error("execution record {0} already exists")]
    AlreadyExists(String),
}

/// One execution record.
#[derive(Debug, Clone)]
pub struct Execution {
    pub id: String,
    pub language: String,
    pub status: String,
    pub test_status: String,
    pub compile_ms: i64,
    pub runtime_ms: i64,
    pub runtime_memory_mb: i64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Execution {
    pub fn new(id: impl Into<String>, language: impl Into<String>, status: String, test_status: String) -> Self {
        let now = SystemTime::now();

        Execution {
            id: id.into(),
            language: language.into(),
            status,
            test_status,
            compile_ms: 0,
            runtime_ms: 0,
            runtime_memory_mb: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to an existing record; unset fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPatch {
    pub status: Option<String>,
    pub test_status: Option<String>,
    pub compile_ms: Option<i64>,
    pub runtime_ms: Option<i64>,
    pub runtime_memory_mb: Option<i64>,
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn insert(&self, execution: Execution) -> Result<(), RepositoryError>;

    /// Apply a patch; the returned flag reports whether a record changed.
    async fn update(&self, id: &str, patch: ExecutionPatch) -> Result<bool, RepositoryError>;

    async fn update_status(&self, id: &str, status: &str) -> Result<(), RepositoryError>;

    async fn get(&self, id: &str) -> Result<Execution, RepositoryError>;
}
