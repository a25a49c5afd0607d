//! File store: where submitted sources and execution artifacts live.
//!
//! Every stored file is addressed by `(request id, name)` and laid out as
//! `<id>/<name>` in the backing store. The pipeline guarantees a single
//! writer per request id; different ids may be written concurrently.

pub mod local;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalFileStore;

#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("cannot locate file {name} for request {id}")]
    NotFound { id: String, name: String },

    #[error("file store io failure: {0}")]
    Io(#[from] std::io::Error),
}

/// A file addressed by request id and name.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub data: Vec<u8>,
}

impl StoredFile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, data: Vec<u8>) -> Self {
        StoredFile {
            id: id.into(),
            name: name.into(),
            data,
        }
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn write_file(&self, file: &StoredFile) -> Result<(), FileStoreError>;

    /// Write a batch of files concurrently, collecting every failure
    /// rather than stopping at the first.
    async fn write_files(&self, files: &[StoredFile]) -> Vec<FileStoreError>;

    async fn get_file(&self, id: &str, name: &str) -> Result<Vec<u8>, FileStoreError>;
}
