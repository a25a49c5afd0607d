//! Sandbox container entrypoint.
//!
//! Reads the runner-parameters document the host materialized at
//! `/input/runner.json`, supervises the compile and run phases, and writes
//! the runner-result document to `/input/runner-out.json` exactly once
//! before exiting. The host only ever consumes the written document; the
//! process exit status is irrelevant.

mod phases;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kiln_core::sandbox::{ContainerStatus, ExecutionParameters, ExecutionResponse};

use phases::{CompileOutcome, RunOutcome};

const INPUT_ROOT: &str = "/input";
const PARAMETERS_FILE: &str = "runner.json";
const RESULT_FILE: &str = "runner-out.json";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let root = PathBuf::from(INPUT_ROOT);

    let raw = std::fs::read(root.join(PARAMETERS_FILE))
        .context("runner parameters document does not exist; the sandbox cannot execute")?;

    let params: ExecutionParameters =
        serde_json::from_slice(&raw).context("runner parameters document failed to parse")?;

    log::info!(
        "executing incoming request id={} language={} compiled={}",
        params.id,
        params.language,
        !params.compile_steps.is_empty()
    );

    let response = supervise(root.clone(), params).await;

    log::debug!("response: {:?}", response);
    write_result(&root, &response)?;

    Ok(())
}

/// Run both phases, mapping every failure mode (including a panicking
/// phase) onto exactly one terminal status.
async fn supervise(root: PathBuf, params: ExecutionParameters) -> ExecutionResponse {
    // Phases run in their own tasks so a panic surfaces as a join error
    // here instead of taking down the process before the result document
    // has been written.
    let compile_outcome = match tokio::spawn(phases::compile(root.clone(), params.clone())).await {
        Ok(outcome) => outcome,
        Err(err) => {
            log::error!("compile phase aborted: {}", err);
            CompileOutcome {
                failure: Some(ContainerStatus::NonDeterministicError),
                ..Default::default()
            }
        }
    };

    let run_outcome = if compile_outcome.failure.is_none() {
        match tokio::spawn(phases::run(root, params)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("run phase aborted: {}", err);
                RunOutcome {
                    failure: Some(ContainerStatus::NonDeterministicError),
                    ..Default::default()
                }
            }
        }
    } else {
        // A failed compile skips the run phase entirely.
        RunOutcome::default()
    };

    let status = compile_outcome
        .failure
        .or(run_outcome.failure)
        .unwrap_or(ContainerStatus::Finished);

    ExecutionResponse {
        status,
        runtime: run_outcome.duration,
        compile_time: compile_outcome.duration,
        output: run_outcome.output,
        output_err: run_outcome.output_err,
        compiler_output: compile_outcome.compiler_output,
        runtime_memory_bytes: run_outcome.memory,
    }
}

/// Serialize the result document and move it into place atomically, so the
/// host can never observe a partially written file.
fn write_result(root: &Path, response: &ExecutionResponse) -> Result<()> {
    let encoded = serde_json::to_vec_pretty(response).context("failed to encode runner result")?;

    let staged = tempfile::NamedTempFile::new_in(root)
        .context("failed to stage runner result document")?;

    std::fs::write(staged.path(), &encoded).context("failed to write runner result document")?;

    staged
        .persist(root.join(RESULT_FILE))
        .context("failed to persist runner result document")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::mem::MemSize;
    use std::io::Write;
    use std::time::Duration;

    fn params(run_command: &str, compile_steps: &[&str]) -> ExecutionParameters {
        ExecutionParameters {
            id: uuid::Uuid::new_v4().to_string(),
            language: "Test".to_string(),
            standard_input: "input".to_string(),
            compile_steps: compile_steps.iter().map(|step| step.to_string()).collect(),
            run_command: run_command.to_string(),
            run_timeout: Duration::from_secs(5),
            compile_timeout: Duration::from_secs(5),
            execution_memory: MemSize::from_gibibytes(1),
        }
    }

    fn scratch() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("input")).unwrap();
        dir
    }

    #[tokio::test]
    async fn a_clean_execution_finishes() {
        let dir = scratch();

        let response = supervise(dir.path().to_path_buf(), params("echo hi", &["true"])).await;

        assert_eq!(response.status, ContainerStatus::Finished);
        assert_eq!(response.output, vec!["hi".to_string()]);
        assert!(response.runtime > Duration::ZERO);
        assert!(response.compile_time > Duration::ZERO);

        // Memory is accounted to the run child alone; a tiny program must
        // report a tiny peak no matter what the compile phase spawned.
        assert!(response.runtime_memory_bytes > MemSize::from_bytes(0));
        assert!(response.runtime_memory_bytes < MemSize::from_mebibytes(256));
    }

    #[tokio::test]
    async fn a_failed_compile_skips_the_run_phase() {
        let dir = scratch();

        let response = supervise(
            dir.path().to_path_buf(),
            params("echo never-runs", &["cat /kiln-no-such-file"]),
        )
        .await;

        assert_eq!(response.status, ContainerStatus::CompilationFailed);
        assert!(!response.compiler_output.is_empty());
        assert!(response.output.is_empty());
        assert_eq!(response.runtime, Duration::ZERO);
    }

    #[tokio::test]
    async fn the_result_document_is_written_atomically_in_place() {
        let dir = scratch();

        let response = supervise(dir.path().to_path_buf(), params("echo hi", &[])).await;
        write_result(dir.path(), &response).unwrap();

        let raw = std::fs::read(dir.path().join(RESULT_FILE)).unwrap();
        let decoded: ExecutionResponse = serde_json::from_slice(&raw).unwrap();

        assert_eq!(decoded.status, ContainerStatus::Finished);
        assert_eq!(decoded.output, vec!["hi".to_string()]);

        // Nothing else may be left behind in the scratch directory apart
        // from the inputs and the captured stream files.
        let mut leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        leftovers.sort();
        assert_eq!(
            leftovers,
            vec![
                "input".to_string(),
                "run-error-output".to_string(),
                "run-standard-output".to_string(),
                RESULT_FILE.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn stdin_echo_programs_see_their_input_unchanged() {
        let dir = scratch();

        let mut input = std::fs::File::create(dir.path().join("input")).unwrap();
        writeln!(input, "first line").unwrap();
        writeln!(input, "second line").unwrap();
        drop(input);

        let response = supervise(dir.path().to_path_buf(), params("cat", &[])).await;

        assert_eq!(response.status, ContainerStatus::Finished);
        assert_eq!(
            response.output,
            vec!["first line".to_string(), "second line".to_string()]
        );
    }
}
