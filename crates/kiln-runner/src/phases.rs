//! Compile and run phases for one supervised execution.
//!
//! Both phases spawn untrusted child processes under a phase timeout. The
//! run phase additionally samples the child's resident-set size at a ~10ms
//! cadence and signal-kills it the moment the sampled value crosses the
//! execution memory cap; the container-level cap remains as the backstop
//! for anything sampling misses.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use kiln_core::mem::MemSize;
use kiln_core::pid;
use kiln_core::sandbox::{ContainerStatus, ExecutionParameters};
use tokio::process::Command;
use tokio::sync::oneshot;

/// File the run phase redirects the child's stdout into.
pub const RUN_STDOUT_FILE: &str = "run-standard-output";
/// File the run phase redirects the child's stderr into.
pub const RUN_STDERR_FILE: &str = "run-error-output";

/// Captured output streams are cut at this many lines; everything beyond
/// is discarded so an execution cannot flood memory on read-back.
pub const OUTPUT_LINE_CAP: usize = 1_000;

#[derive(Debug, Default)]
pub struct CompileOutcome {
    pub compiler_output: Vec<String>,
    pub duration: Duration,
    /// Terminal status when the phase failed; `None` means compiled.
    pub failure: Option<ContainerStatus>,
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub output: Vec<String>,
    pub output_err: Vec<String>,
    pub duration: Duration,
    /// Peak resident memory: the larger of the live-sampled peak and the
    /// high-water mark the kernel accounted to the run child itself.
    pub memory: MemSize,
    /// Terminal status when the phase failed; `None` means finished.
    pub failure: Option<ContainerStatus>,
}

/// Execute the compile steps in order under the shared compile timeout.
///
/// The first non-zero exit stops the phase with `CompilationFailed`;
/// running past the timeout stops it with `TimeLimitExceeded`. Interpreted
/// languages have no steps and pass straight through.
pub async fn compile(root: PathBuf, params: ExecutionParameters) -> CompileOutcome {
    let mut outcome = CompileOutcome::default();

    if params.compile_steps.is_empty() {
        return outcome;
    }

    log::info!("compile start id={}", params.id);

    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + params.compile_timeout;

    for step in &params.compile_steps {
        let Some((program, arguments)) = split_command(step) else {
            outcome.compiler_output = vec![format!("invalid compile step: {step}")];
            outcome.failure = Some(ContainerStatus::CompilationFailed);
            break;
        };

        let mut command = Command::new(program);
        command
            .args(arguments)
            .current_dir(&root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout_at(deadline, command.output()).await {
            Err(_) => {
                outcome.failure = Some(ContainerStatus::TimeLimitExceeded);
                break;
            }
            Ok(Err(err)) => {
                outcome.compiler_output = vec![format!("failed to spawn compile step: {err}")];
                outcome.failure = Some(ContainerStatus::CompilationFailed);
                break;
            }
            Ok(Ok(output)) => {
                let mut combined = output.stdout;
                combined.extend_from_slice(&output.stderr);

                if !combined.is_empty() {
                    outcome.compiler_output = String::from_utf8_lossy(&combined)
                        .lines()
                        .map(str::to_string)
                        .collect();
                }

                if !output.status.success() {
                    outcome.failure = Some(ContainerStatus::CompilationFailed);
                    break;
                }
            }
        }
    }

    outcome.duration = started.elapsed();

    log::info!(
        "compile complete id={} duration-nano={} failed={}",
        params.id,
        outcome.duration.as_nanos(),
        outcome.failure.is_some()
    );

    outcome
}

/// Execute the run command with stdin redirected from the materialized
/// input file and both output streams redirected to files, under the run
/// timeout and the execution memory cap.
pub async fn run(root: PathBuf, params: ExecutionParameters) -> RunOutcome {
    let mut outcome = RunOutcome::default();

    log::info!("run start id={}", params.id);

    let Some((program, arguments)) = split_command(&params.run_command) else {
        outcome.failure = Some(ContainerStatus::RunTimeError);
        return outcome;
    };

    let stdio = open_run_stdio(&root, &params.standard_input);

    let (stdin, stdout, stderr) = match stdio {
        Ok(files) => files,
        Err(err) => {
            outcome.output_err = vec![format!("failed to prepare run io: {err}")];
            outcome.failure = Some(ContainerStatus::RunTimeError);
            return outcome;
        }
    };

    let mut command = std::process::Command::new(program);
    command
        .args(arguments)
        .current_dir(&root)
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    let started = Instant::now();

    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            outcome.output_err = vec![format!("failed to spawn run command: {err}")];
            outcome.failure = Some(ContainerStatus::RunTimeError);
            return outcome;
        }
    };

    let child_pid = child.id();

    // The blocking wait owns the reap so the exit status comes back with
    // the run child's own rusage; an async wait would swallow it.
    let mut reaper = tokio::task::spawn_blocking(move || wait_for_child(child_pid));

    // Sampling runs until the child has been waited on; the sender side of
    // the cancellation channel is dropped right after the wait completes.
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let mut samples = pid::stream(child_pid, cancel_rx);

    let run_deadline = tokio::time::sleep(params.run_timeout);
    tokio::pin!(run_deadline);

    let mut sampled_peak = MemSize::from_bytes(0);
    let mut child_peak = MemSize::from_bytes(0);
    let mut exit_success = false;

    loop {
        tokio::select! {
            reaped = &mut reaper => {
                match reaped {
                    Ok((clean_exit, peak)) => {
                        exit_success = clean_exit;
                        child_peak = peak;
                    }
                    Err(err) => log::error!("wait for run child aborted: {}", err),
                }

                break;
            }
            Some(sample) = samples.recv() => {
                if sample.memory <= sampled_peak {
                    continue;
                }

                sampled_peak = sample.memory;

                if outcome.failure.is_none() && sampled_peak > params.execution_memory {
                    log::info!(
                        "memory cap crossed id={} sampled-mb={:.2} cap-mb={:.2}",
                        params.id,
                        sampled_peak.mebibytes_f64(),
                        params.execution_memory.mebibytes_f64()
                    );

                    outcome.failure = Some(ContainerStatus::MemoryConstraintExceeded);
                    signal_kill(child_pid);
                }
            }
            _ = &mut run_deadline, if outcome.failure.is_none() => {
                outcome.failure = Some(ContainerStatus::TimeLimitExceeded);
                signal_kill(child_pid);
            }
        }
    }

    drop(cancel_tx);
    outcome.duration = started.elapsed();

    // The child's own high-water mark catches whatever happened between
    // samples; the reported peak is the larger of the two. Compile-phase
    // children never feed into this number.
    outcome.memory = sampled_peak.max(child_peak);

    log::info!(
        "run complete id={} duration-nano={} sampled-mb={:.2} peak-mb={:.2}",
        params.id,
        outcome.duration.as_nanos(),
        sampled_peak.mebibytes_f64(),
        outcome.memory.mebibytes_f64()
    );

    let killed_for_memory = outcome.failure == Some(ContainerStatus::MemoryConstraintExceeded);

    if outcome.memory > params.execution_memory {
        outcome.failure = Some(ContainerStatus::MemoryConstraintExceeded);
    }

    if killed_for_memory {
        return outcome;
    }

    outcome.output = read_capped_lines(&root.join(RUN_STDOUT_FILE), OUTPUT_LINE_CAP);
    outcome.output_err = read_capped_lines(&root.join(RUN_STDERR_FILE), OUTPUT_LINE_CAP);

    if outcome.failure.is_none() && !exit_success {
        outcome.failure = Some(ContainerStatus::RunTimeError);
    }

    outcome
}

fn open_run_stdio(root: &Path, standard_input: &str) -> std::io::Result<(File, File, File)> {
    let stdin = File::open(root.join(standard_input))?;
    let stdout = File::create(root.join(RUN_STDOUT_FILE))?;
    let stderr = File::create(root.join(RUN_STDERR_FILE))?;
    Ok((stdin, stdout, stderr))
}

/// Reap the run child, returning whether it exited cleanly together with
/// the peak resident memory the kernel accounted to that process alone.
#[cfg(unix)]
fn wait_for_child(pid: u32) -> (bool, MemSize) {
    let mut status: libc::c_int = 0;
    let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };

    let reaped = unsafe { libc::wait4(pid as libc::pid_t, &mut status, 0, &mut rusage) };

    if reaped != pid as libc::pid_t {
        return (false, MemSize::from_bytes(0));
    }

    let clean_exit = libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0;

    // ru_maxrss is reported in KiB on Linux.
    (clean_exit, MemSize::from_kibibytes(rusage.ru_maxrss.max(0) as u64))
}

#[cfg(not(unix))]
fn wait_for_child(_pid: u32) -> (bool, MemSize) {
    (false, MemSize::from_bytes(0))
}

#[cfg(unix)]
fn signal_kill(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn signal_kill(_pid: u32) {}

fn split_command(raw: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = raw.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Read at most `cap` lines from a captured output file. The cut is by
/// line count, never mid-line; a missing file reads as no output.
fn read_capped_lines(path: &Path, cap: usize) -> Vec<String> {
    let Ok(file) = File::open(path) else {
        return Vec::new();
    };

    BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .take(cap)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

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

    fn scratch(stdin_lines: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut input = File::create(dir.path().join("input")).unwrap();

        for line in stdin_lines {
            writeln!(input, "{line}").unwrap();
        }

        dir
    }

    #[tokio::test]
    async fn compile_without_steps_passes_straight_through() {
        let dir = scratch(&[]);
        let outcome = compile(dir.path().to_path_buf(), params("true", &[])).await;

        assert!(outcome.failure.is_none());
        assert!(outcome.compiler_output.is_empty());
    }

    #[tokio::test]
    async fn failing_compile_step_stops_the_phase() {
        let dir = scratch(&[]);
        let outcome = compile(
            dir.path().to_path_buf(),
            params("true", &["cat /kiln-no-such-file", "true"]),
        )
        .await;

        assert_eq!(outcome.failure, Some(ContainerStatus::CompilationFailed));
        assert!(!outcome.compiler_output.is_empty(), "stderr must be captured");
    }

    #[tokio::test]
    async fn compile_timeout_is_a_time_limit() {
        let dir = scratch(&[]);

        let mut params = params("true", &["sleep 5"]);
        params.compile_timeout = Duration::from_millis(50);

        let outcome = compile(dir.path().to_path_buf(), params).await;
        assert_eq!(outcome.failure, Some(ContainerStatus::TimeLimitExceeded));
    }

    #[tokio::test]
    async fn run_captures_stdout_lines() {
        let dir = scratch(&[]);
        let outcome = run(dir.path().to_path_buf(), params("echo Hello, World!", &[])).await;

        assert!(outcome.failure.is_none());
        assert_eq!(outcome.output, vec!["Hello, World!".to_string()]);
        assert!(outcome.output_err.is_empty());
        assert!(outcome.duration > Duration::ZERO);
        assert!(
            outcome.memory > MemSize::from_bytes(0),
            "the run child's own rusage must be folded into the peak"
        );
    }

    #[tokio::test]
    async fn run_feeds_the_materialized_stdin_to_the_child() {
        let dir = scratch(&["first line", "second line"]);
        let outcome = run(dir.path().to_path_buf(), params("cat", &[])).await;

        assert!(outcome.failure.is_none());
        assert_eq!(
            outcome.output,
            vec!["first line".to_string(), "second line".to_string()]
        );
    }

    #[tokio::test]
    async fn run_timeout_kills_the_child() {
        let dir = scratch(&[]);

        let mut params = params("sleep 5", &[]);
        params.run_timeout = Duration::from_millis(100);

        let started = Instant::now();
        let outcome = run(dir.path().to_path_buf(), params).await;

        assert_eq!(outcome.failure, Some(ContainerStatus::TimeLimitExceeded));
        assert!(outcome.duration >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_runtime_error() {
        let dir = scratch(&[]);
        let outcome = run(dir.path().to_path_buf(), params("false", &[])).await;

        assert_eq!(outcome.failure, Some(ContainerStatus::RunTimeError));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn crossing_the_memory_cap_kills_the_child() {
        let dir = scratch(&[]);

        let mut params = params("sleep 5", &[]);
        params.execution_memory = MemSize::from_bytes(1);

        let started = Instant::now();
        let outcome = run(dir.path().to_path_buf(), params).await;

        assert_eq!(
            outcome.failure,
            Some(ContainerStatus::MemoryConstraintExceeded)
        );
        assert!(outcome.memory > MemSize::from_bytes(1));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcome.output.is_empty(), "a memory kill skips output capture");
    }

    #[tokio::test]
    async fn missing_run_binary_is_a_runtime_error() {
        let dir = scratch(&[]);
        let outcome = run(dir.path().to_path_buf(), params("/kiln-no-such-binary", &[])).await;

        assert_eq!(outcome.failure, Some(ContainerStatus::RunTimeError));
        assert!(!outcome.output_err.is_empty());
    }

    #[test]
    fn capped_reads_cut_by_line_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big-output");

        let mut file = File::create(&path).unwrap();
        for n in 0..1_001 {
            writeln!(file, "line {n}").unwrap();
        }
        drop(file);

        let capped = read_capped_lines(&path, OUTPUT_LINE_CAP);
        assert_eq!(capped.len(), 1_000);
        assert_eq!(capped[999], "line 999");
    }

    #[test]
    fn exactly_a_thousand_lines_survive_in_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exact-output");

        let mut file = File::create(&path).unwrap();
        for n in 0..1_000 {
            writeln!(file, "line {n}").unwrap();
        }
        drop(file);

        assert_eq!(read_capped_lines(&path, OUTPUT_LINE_CAP).len(), 1_000);
    }

    #[test]
    fn command_splitting_rejects_blank_commands() {
        assert!(split_command("   ").is_none());

        let (program, arguments) = split_command("gcc -o /solution /input/solution.c").unwrap();
        assert_eq!(program, "gcc");
        assert_eq!(arguments, vec!["-o", "/solution", "/input/solution.c"]);
    }
}
