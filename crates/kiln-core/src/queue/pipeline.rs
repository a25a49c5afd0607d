//! The consumer pipeline: one queue message in, one durable execution out.
//!
//! For each message the pipeline fetches the submitted source, admits a
//! sandbox request into the container manager, awaits completion under the
//! overall deadline, persists the captured outputs as artifacts and
//! updates the execution record. Terminal in-sandbox outcomes are not
//! errors here; only preparation and start failures fail the message.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::QueueError;
use crate::files::{FileStore, StoredFile};
use crate::languages::{self, Language};
use crate::profile;
use crate::queue::{CompileMessage, MessageHandler};
use crate::repository::{ExecutionPatch, ExecutionRepository};
use crate::sandbox::manager::ContainerManager;
use crate::sandbox::{ContainerStatus, Response, SandboxRequest, Test};

pub struct Pipeline {
    manager: Arc<ContainerManager>,
    repository: Arc<dyn ExecutionRepository>,
    files: Arc<dyn FileStore>,
}

impl Pipeline {
    pub fn new(
        manager: Arc<ContainerManager>,
        repository: Arc<dyn ExecutionRepository>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Pipeline {
            manager,
            repository,
            files,
        }
    }

    /// Scratch directory for one request id.
    fn scratch_path(id: &str) -> PathBuf {
        env::temp_dir().join("executions").join("raw").join(id)
    }

    async fn mark_status(&self, id: &str, status: ContainerStatus) {
        if let Err(err) = self.repository.update_status(id, &status.to_string()).await {
            log::error!("failed to mark execution {} as {}: {}", id, status, err);
        }
    }

    async fn persist_artifacts(&self, id: &str, language: &Language, response: &Response) {
        let mut artifacts = vec![
            StoredFile::new(id, language.output_file, join_lines(&response.output)),
            StoredFile::new(id, language.output_err_file, join_lines(&response.output_err)),
        ];

        // Interpreted languages never produce compiler output.
        if !language.interpreter {
            artifacts.push(StoredFile::new(
                id,
                language.compiler_output_file,
                join_lines(&response.compiler_output),
            ));
        }

        for err in self.files.write_files(&artifacts).await {
            log::error!("failed to persist artifact for execution {}: {}", id, err);
        }
    }
}

#[async_trait]
impl MessageHandler for Pipeline {
    async fn handle(&self, body: &[u8]) -> Result<(), QueueError> {
        let message: CompileMessage = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("dropping unparseable compile request: {}", err);
                return Ok(());
            }
        };

        let Some(language) = languages::by_code(&message.language) else {
            log::warn!(
                "dropping compile request {} for unsupported language {}",
                message.id,
                message.language
            );
            return Ok(());
        };

        let source = self
            .files
            .get_file(&message.id, language.source_file)
            .await?;

        let profile = profile::profile_for_machine();
        let deadline = profile.compile_timeout + profile.code_timeout;

        let test = (!message.stdin_data.is_empty() || !message.expected_stdout_data.is_empty())
            .then(|| Test {
                id: message.id.clone(),
                stdin_data: message.stdin_data.clone(),
                expected_stdout_data: message.expected_stdout_data.clone(),
            });

        let request = SandboxRequest {
            id: message.id.clone(),
            profile,
            scratch_path: Self::scratch_path(&message.id),
            source_code: String::from_utf8_lossy(&source).into_owned(),
            language,
            test,
        };

        self.mark_status(&message.id, ContainerStatus::Created).await;

        let (container_id, complete) = match self.manager.add_container(request).await {
            Ok(admitted) => admitted,
            Err(err) => {
                self.mark_status(&message.id, ContainerStatus::NonDeterministicError)
                    .await;
                return Err(err.into());
            }
        };

        self.mark_status(&message.id, ContainerStatus::Running).await;

        // The container enforces its own phase timeouts; this deadline only
        // bounds how long the handler waits for the completion signal. On
        // expiry the container is deliberately left registered for an
        // operator to reap.
        if tokio::time::timeout(deadline, complete).await.is_err() {
            log::error!(
                "execution {} exceeded its overall deadline of {:?}; abandoning container {}",
                message.id,
                deadline,
                container_id
            );
            return Ok(());
        }

        let Some(response) = self.manager.get_response(&container_id).await else {
            log::error!(
                "execution {} completed but container {} has no response",
                message.id,
                container_id
            );
            return Ok(());
        };

        self.persist_artifacts(&message.id, language, &response).await;

        self.manager.remove_container(&container_id, false).await?;

        let updated = self
            .repository
            .update(
                &message.id,
                ExecutionPatch {
                    status: Some(response.status.to_string()),
                    test_status: Some(response.test_status.to_string()),
                    compile_ms: Some(response.compile_time.as_millis() as i64),
                    runtime_ms: Some(response.runtime.as_millis() as i64),
                    runtime_memory_mb: Some(response.memory.mebibytes() as i64),
                },
            )
            .await;

        match updated {
            Ok(changed) if !changed => {
                log::warn!("execution record {} vanished before the final update", message.id)
            }
            Ok(_) => {}
            Err(err) => log::error!("failed to record outcome of execution {}: {}", message.id, err),
        }

        Ok(())
    }
}

fn join_lines(lines: &[String]) -> Vec<u8> {
    lines.join("\n").into_bytes()
}
