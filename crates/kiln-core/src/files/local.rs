//! Local-directory file store used during development and testing, where
//! the object store an installation would normally persist to is not
//! available.

use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::fs;

use super::{FileStore, FileStoreError, StoredFile};

pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFileStore { root: root.into() }
    }

    fn file_path(&self, id: &str, name: &str) -> PathBuf {
        self.root.join(id).join(name)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn write_file(&self, file: &StoredFile) -> Result<(), FileStoreError> {
        log::debug!("writing file {} for request {} locally", file.name, file.id);

        let directory = self.root.join(&file.id);
        fs::create_dir_all(&directory).await?;
        fs::write(directory.join(&file.name), &file.data).await?;

        Ok(())
    }

    async fn write_files(&self, files: &[StoredFile]) -> Vec<FileStoreError> {
        let writes = files.iter().map(|file| self.write_file(file));

        join_all(writes)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    async fn get_file(&self, id: &str, name: &str) -> Result<Vec<u8>, FileStoreError> {
        let path = self.file_path(id, name);

        if !path.exists() {
            return Err(FileStoreError::NotFound {
                id: id.to_string(),
                name: name.to_string(),
            });
        }

        Ok(fs::read(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn write_then_get_round_trips() {
        let (_dir, store) = store();

        let file = StoredFile::new("req-1", "source", b"print(1)".to_vec());
        store.write_file(&file).await.unwrap();

        let data = store.get_file("req-1", "source").await.unwrap();
        assert_eq!(data, b"print(1)");
    }

    #[tokio::test]
    async fn files_are_laid_out_as_id_slash_name() {
        let (dir, store) = store();

        let file = StoredFile::new("req-2", "output", b"hello".to_vec());
        store.write_file(&file).await.unwrap();

        assert!(dir.path().join("req-2").join("output").exists());
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        let (_dir, store) = store();

        let err = store.get_file("req-3", "output").await.unwrap_err();
        assert!(matches!(err, FileStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn batched_writes_report_no_errors_on_success() {
        let (_dir, store) = store();

        let errors = store
            .write_files(&[
                StoredFile::new("req-4", "output", b"out".to_vec()),
                StoredFile::new("req-4", "output_error", b"".to_vec()),
                StoredFile::new("req-5", "output", b"other".to_vec()),
            ])
            .await;

        assert!(errors.is_empty());
        assert_eq!(store.get_file("req-4", "output").await.unwrap(), b"out");
        assert_eq!(store.get_file("req-5", "output").await.unwrap(), b"other");
    }
}
