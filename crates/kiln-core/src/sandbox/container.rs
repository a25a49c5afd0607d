//! One sandbox execution.
//!
//! A [`SandboxContainer`] owns a single execution end to end: it
//! materializes the scratch directory, creates and starts the container,
//! consumes the daemon events addressed to it, ingests the runner-result
//! document once the container is destroyed and derives the final test
//! verdict. The manager only ever reaches in to append events and to read
//! the final response.

use bollard::models::{ContainerCreateBody, EventMessage, HostConfig};
use bollard::query_parameters::{CreateContainerOptions, StartContainerOptions};
use bollard::Docker;
use tokio::fs;
use tokio::sync::{oneshot, Mutex};

use crate::errors::SandboxError;
use crate::sandbox::path::to_unix_bind_path;
use crate::sandbox::{
    ContainerStatus, ContainerTestStatus, ExecutionParameters, ExecutionResponse, Response,
    SandboxRequest, Test,
};

const RUNNER_PARAMETERS_FILE: &str = "runner.json";
const RUNNER_RESULT_FILE: &str = "runner-out.json";

pub struct SandboxContainer {
    docker: Docker,
    request: SandboxRequest,
    state: Mutex<ContainerState>,
}

struct ContainerState {
    /// Runtime id assigned by the daemon on create; empty until then.
    container_id: String,
    status: ContainerStatus,
    events: Vec<EventMessage>,
    response: Option<ExecutionResponse>,
    /// Fired exactly once, when the container has been destroyed and the
    /// result document ingested.
    complete: Option<oneshot::Sender<()>>,
}

impl SandboxContainer {
    pub fn new(request: SandboxRequest, docker: Docker) -> Self {
        SandboxContainer {
            docker,
            request,
            state: Mutex::new(ContainerState {
                container_id: String::new(),
                status: ContainerStatus::NotRan,
                events: Vec::new(),
                response: None,
                complete: None,
            }),
        }
    }

    pub fn request(&self) -> &SandboxRequest {
        &self.request
    }

    /// Prepare the scratch directory, then create and start the container.
    ///
    /// Returns the runtime container id and a single-use completion signal
    /// fired when the container has been destroyed and its result
    /// ingested. On failure the scratch directory has already been cleaned
    /// up and no container is left behind.
    pub async fn run(&self) -> Result<(String, oneshot::Receiver<()>), SandboxError> {
        let complete = self.arm().await;

        if let Err(err) = self.prepare().await {
            self.cleanup().await;
            return Err(err);
        }

        match self.execute().await {
            Ok(container_id) => Ok((container_id, complete)),
            Err(err) => {
                self.cleanup().await;
                Err(err)
            }
        }
    }

    async fn arm(&self) -> oneshot::Receiver<()> {
        let (complete_tx, complete_rx) = oneshot::channel();
        self.state.lock().await.complete = Some(complete_tx);
        complete_rx
    }

    /// Materialize the sandbox inputs: the source file (with a trailing
    /// line terminator), the stdin file (one newline-terminated line per
    /// test stdin entry, empty without a test) and the runner-parameters
    /// document.
    async fn prepare(&self) -> Result<(), SandboxError> {
        let language = self.request.language;
        let scratch = &self.request.scratch_path;

        fs::create_dir_all(scratch).await?;

        let mut source = self.request.source_code.clone();
        source.push('\n');
        fs::write(scratch.join(language.source_file), source).await?;

        let mut input = String::new();

        if let Some(test) = &self.request.test {
            for line in &test.stdin_data {
                input.push_str(line);
                input.push('\n');
            }
        }

        fs::write(scratch.join(language.input_file), input).await?;

        let parameters = ExecutionParameters {
            id: self.request.id.clone(),
            language: language.display_name.to_string(),
            standard_input: language.input_file.to_string(),
            compile_steps: language
                .compile_steps
                .iter()
                .map(|step| step.to_string())
                .collect(),
            run_command: language.run_command.to_string(),
            run_timeout: self.request.profile.code_timeout,
            compile_timeout: self.request.profile.compile_timeout,
            execution_memory: self.request.profile.execution_memory,
        };

        let encoded = serde_json::to_vec(&parameters)?;
        fs::write(scratch.join(RUNNER_PARAMETERS_FILE), encoded).await?;

        Ok(())
    }

    /// Create and start the container: runner entrypoint, language base
    /// image, no network, scratch directory bound read-write on `/input`,
    /// resource caps from the profile.
    async fn execute(&self) -> Result<String, SandboxError> {
        let profile = &self.request.profile;
        let bind_source = to_unix_bind_path(&self.request.scratch_path);

        let config = ContainerCreateBody {
            entrypoint: Some(vec!["/runner".to_string()]),
            image: Some(self.request.language.image.to_string()),
            network_disabled: Some(true),
            working_dir: Some("/input".to_string()),
            host_config: Some(HostConfig {
                runtime: profile.runtime.for_host_config(),
                auto_remove: Some(profile.auto_remove),
                binds: Some(vec![format!("{bind_source}:/input")]),
                memory: Some(profile.memory.docker_bytes()),
                memory_swap: Some(profile.memory_swap.docker_bytes()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(self.request.id.clone()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(SandboxError::Start)?;

        self.state.lock().await.container_id = created.id.clone();

        self.docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
            .map_err(SandboxError::Start)?;

        Ok(created.id)
    }

    /// Append a daemon event addressed to this container and apply its
    /// state transition. Unknown actions are recorded without a
    /// transition; `destroy` ingests the result document, deletes the
    /// scratch directory and fires the completion signal.
    pub async fn add_event(&self, event: EventMessage) {
        let mut state = self.state.lock().await;
        let action = event.action.clone().unwrap_or_default();

        log::info!(
            "handling incoming docker event action={} container={} request={}",
            action,
            short_id(&state.container_id),
            self.request.id,
        );

        match action.as_str() {
            "create" => state.status = ContainerStatus::Created,
            "start" => state.status = ContainerStatus::Running,
            "kill" => state.status = ContainerStatus::Killing,
            "die" => state.status = ContainerStatus::Killed,
            "destroy" => {
                self.ingest_result(&mut state).await;
                self.cleanup_locked(&mut state).await;
            }
            other => {
                log::debug!(
                    "unhandled action {} for container {}",
                    other,
                    short_id(&state.container_id)
                );
            }
        }

        state.events.push(event);
    }

    /// Adopt the runner-result document as the terminal state. A missing
    /// or unparseable document becomes `NonDeterministicError`.
    async fn ingest_result(&self, state: &mut ContainerState) {
        let path = self.request.scratch_path.join(RUNNER_RESULT_FILE);

        let response = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                log::error!(
                    "runner result document for request {} is unparseable: {}",
                    self.request.id,
                    err
                );
                ExecutionResponse::non_deterministic()
            }),
            Err(err) => {
                log::error!(
                    "runner result document for request {} is unreadable: {}",
                    self.request.id,
                    err
                );
                ExecutionResponse::non_deterministic()
            }
        };

        state.status = response.status;
        state.response = Some(response);
    }

    async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        self.cleanup_locked(&mut state).await;
    }

    /// Delete the scratch directory (best-effort) and fire the completion
    /// signal if it has not fired yet.
    async fn cleanup_locked(&self, state: &mut ContainerState) {
        if let Err(err) = fs::remove_dir_all(&self.request.scratch_path).await {
            log::debug!(
                "failed to clean up scratch directory for request {}: {}",
                self.request.id,
                err
            );
        }

        if let Some(complete) = state.complete.take() {
            let _ = complete.send(());
        }
    }

    pub async fn status(&self) -> ContainerStatus {
        self.state.lock().await.status
    }

    /// Final response for this execution. `None` until the `destroy` event
    /// has been ingested.
    pub async fn response(&self) -> Option<Response> {
        let state = self.state.lock().await;
        let execution = state.response.clone()?;

        let test_status =
            derive_test_status(execution.status, self.request.test.as_ref(), &execution.output);

        Some(Response {
            compiler_output: execution.compiler_output,
            output: execution.output,
            output_err: execution.output_err,
            status: execution.status,
            test_status,
            runtime: execution.runtime,
            compile_time: execution.compile_time,
            memory: execution.runtime_memory_bytes,
        })
    }
}

/// Verdict for the optional test: only a `Finished` execution with a test
/// attached is compared, line count first and then line-by-line equality.
fn derive_test_status(
    status: ContainerStatus,
    test: Option<&Test>,
    output: &[String],
) -> ContainerTestStatus {
    let Some(test) = test else {
        return ContainerTestStatus::NoTest;
    };

    if status != ContainerStatus::Finished {
        return ContainerTestStatus::TestNotRan;
    }

    if output.len() != test.expected_stdout_data.len() {
        return ContainerTestStatus::TestFailed;
    }

    let matches = output
        .iter()
        .zip(&test.expected_stdout_data)
        .all(|(actual, expected)| actual == expected);

    if matches {
        ContainerTestStatus::TestPassed
    } else {
        ContainerTestStatus::TestFailed
    }
}

fn short_id(container_id: &str) -> &str {
    container_id.get(..12).unwrap_or(container_id)
}
